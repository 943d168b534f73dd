use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use playback::batch::validate_payloads;
use playback::config::{ReplayConfig, SPEED_CHOICES};
use playback::driver::{Notice, spawn_driver};
use playback::ingest::{EventLog, fix_csv};
use playback::participants::{ParticipantDirectory, parse_participant};
use playback::surface::{TextSurface, surface_slot};
use playback::timeline::{build_timeline, format_clock, markers};
use playback::types::{DensityBucket, EventKind, Role};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "replay",
    about = "Replay recorded human-AI writing sessions from the command line"
)]
struct Cli {
    /// Event log CSV (overrides REPLAY_DATA_CSV).
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Participant info CSV (overrides REPLAY_PART_INFO_CSV).
    #[arg(long, global = true)]
    part_info: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List participants with demographics and headline statistics.
    Participants,

    /// Summarize one participant's timeline: events, typing sessions, idle periods, density.
    Timeline {
        /// Participant id (`p3` or `3`).
        participant: String,
    },

    /// Play a session headlessly, printing messages and notices as they appear.
    Play {
        participant: String,

        /// Playback speed multiplier.
        #[arg(long, default_value_t = 10.0)]
        speed: f64,

        /// Start at this percentage of the session.
        #[arg(long)]
        seek: Option<f64>,

        /// Print the document at the end.
        #[arg(long)]
        show_document: bool,
    },

    /// Report empty, undecodable and incomplete operation payloads per participant.
    Validate {
        /// Only report this participant.
        #[arg(long)]
        participant: Option<String>,
    },

    /// Rewrite the encoded columns of an event log as strict JSON.
    FixCsv { input: PathBuf, output: PathBuf },
}

pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ReplayConfig::from_env();
    if let Some(data) = cli.data {
        config.replay_csv = data;
    }
    if let Some(part_info) = cli.part_info {
        config.participant_csv = part_info;
    }

    match cli.command {
        Commands::Participants => run_participants(&config),
        Commands::Timeline { participant } => run_timeline(&config, &participant),
        Commands::Play {
            participant,
            speed,
            seek,
            show_document,
        } => run_play(config, &participant, speed, seek, show_document),
        Commands::Validate { participant } => run_validate(&config, participant.as_deref()),
        Commands::FixCsv { input, output } => run_fix_csv(&input, &output),
    }
}

fn load_log(config: &ReplayConfig) -> Result<EventLog> {
    EventLog::load(&config.replay_csv)
        .with_context(|| format!("failed to load event log {}", config.replay_csv.display()))
}

fn run_participants(config: &ReplayConfig) -> Result<()> {
    let directory = ParticipantDirectory::load(&config.participant_csv).with_context(|| {
        format!(
            "failed to load participant info {}",
            config.participant_csv.display()
        )
    })?;

    for option in directory.options(config.participant_count) {
        let stats = directory.stats(option.essay_id);
        println!(
            "{:<5} {:<45} words={}/{} inquiries={} time={}",
            option.value,
            option.label,
            stats.user_words,
            stats.total_words,
            stats.gpt_inquiry,
            stats.total_time_label(),
        );
    }
    Ok(())
}

fn run_timeline(config: &ReplayConfig, participant: &str) -> Result<()> {
    let essay_id = parse_participant(participant)?;
    let log = load_log(config)?;
    let rows = log.session_rows(essay_id)?;
    let timeline = build_timeline(rows, &config.timeline);

    println!(
        "Participant {} ({} rows, {})",
        essay_id + 1,
        rows.len(),
        format_clock(timeline.total_duration)
    );
    println!(
        "Events: copy={} paste={} gpt={}",
        timeline.count(EventKind::Copy),
        timeline.count(EventKind::Paste),
        timeline.count(EventKind::GptInquiry),
    );

    println!("Typing sessions: {}", timeline.typing_sessions.len());
    for session in &timeline.typing_sessions {
        println!(
            "  {} - {}",
            format_clock(session.start),
            format_clock(session.end)
        );
    }

    println!("Idle periods: {}", timeline.idle_periods.len());
    for idle in &timeline.idle_periods {
        println!(
            "  {} - {} ({:.0}s)",
            format_clock(idle.start),
            format_clock(idle.end),
            idle.duration
        );
    }

    println!("Activity: {}", sparkline(&timeline.activity_density));

    for marker in markers(&timeline) {
        println!(
            "  {:>6.2}%  {:<9} {}",
            marker.percentage, marker.label, marker.time_label
        );
    }
    Ok(())
}

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

fn sparkline(density: &[DensityBucket]) -> String {
    density
        .iter()
        .map(|b| {
            if b.count == 0 {
                ' '
            } else {
                let level = (b.normalized * (SPARK.len() - 1) as f64).round() as usize;
                SPARK[level.min(SPARK.len() - 1)]
            }
        })
        .collect()
}

fn run_play(
    config: ReplayConfig,
    participant: &str,
    speed: f64,
    seek: Option<f64>,
    show_document: bool,
) -> Result<()> {
    let essay_id = parse_participant(participant)?;
    if !SPEED_CHOICES.contains(&speed) {
        tracing::warn!(speed, choices = ?SPEED_CHOICES, "speed is not one of the standard choices");
    }
    let log = Arc::new(load_log(&config)?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async move {
        let (mount, slot) = surface_slot();
        mount.mount(TextSurface::new());
        let mut driver = spawn_driver(log, &config, slot);

        let summary = driver.handle.open(essay_id).await?;
        println!(
            "Loaded participant {} ({} operations, {} malformed, {} messages, {})",
            essay_id + 1,
            summary.operations,
            summary.malformed,
            summary.messages,
            format_clock(summary.total_duration)
        );

        driver.handle.set_speed(speed).await?;
        if let Some(percentage) = seek {
            driver.handle.seek(percentage).await?;
            // Let the seek cooldown lapse before playing.
            tokio::time::sleep(config.timing.seek_cooldown).await;
        }
        driver.handle.play().await?;

        let mut printed = 0;
        loop {
            tokio::select! {
                changed = driver.view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = driver.view.borrow_and_update().clone();
                    for message in view.messages.iter().skip(printed) {
                        let who = match message.role {
                            Role::User => "user",
                            Role::Assistant => "assistant",
                        };
                        let flag = if message.contains_paste { " [pasted]" } else { "" };
                        println!(
                            "[{}] {who}{flag}: {}",
                            format_clock(message.time),
                            message.content
                        );
                    }
                    printed = view.messages.len();
                    if view.loaded && !view.playing && view.progress >= 100.0 {
                        break;
                    }
                }
                Some(notice) = driver.notices.recv() => match notice {
                    Notice::TextCopied { time } => println!("[{}] text copied", format_clock(time)),
                    Notice::Resuming { target_secs } => {
                        println!("[{}] resuming", format_clock(target_secs))
                    }
                },
                _ = tokio::time::sleep(Duration::from_secs(3600)) => {
                    anyhow::bail!("playback stalled");
                }
            }
        }

        let view = driver.handle.snapshot().await?;
        println!("Finished at {}", format_clock(view.current_time));
        if show_document {
            println!("{}", view.document);
        }
        driver.handle.close().await?;
        Ok(())
    })
}

fn run_validate(config: &ReplayConfig, participant: Option<&str>) -> Result<()> {
    let only = participant.map(parse_participant).transpose()?;
    let log = load_log(config)?;

    let mut rows = Vec::new();
    for essay_id in log.essay_ids() {
        if only.is_some_and(|id| id != essay_id) {
            continue;
        }
        rows.extend(log.session_rows(essay_id)?.iter());
    }

    let reports = validate_payloads(rows);
    let mut clean = 0;
    for (essay_id, report) in &reports {
        if report.problems() == 0 {
            clean += 1;
            continue;
        }
        println!(
            "Participant {}: {} editor rows, empty={} parse_errors={} missing_fields={}",
            essay_id + 1,
            report.editor_rows,
            report.empty_payloads,
            report.decode_errors,
            report.missing_fields,
        );
        for sample in &report.samples {
            println!("  {}", serde_json::to_string(sample)?);
        }
    }
    println!("{clean}/{} participants clean", reports.len());
    Ok(())
}

fn run_fix_csv(input: &std::path::Path, output: &std::path::Path) -> Result<()> {
    let stats = fix_csv(input, output)
        .with_context(|| format!("failed to fix {}", input.display()))?;
    println!(
        "Wrote {} of {} rows to {} ({} conversion errors)",
        stats.rows_written,
        stats.rows_read,
        output.display(),
        stats.conversion_errors,
    );
    Ok(())
}
