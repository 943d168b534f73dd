use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use playback::ReplayError;
use playback::batch::{BatchStats, build_batch};
use playback::config::{ReplayConfig, SPEED_CHOICES};
use playback::ingest::EventLog;
use playback::messages::collect_messages;
use playback::participants::{
    LIKERT_MAX, ParticipantDirectory, ParticipantOption, ParticipantStats, parse_participant,
    participant_label,
};
use playback::timeline::{TimelineMarker, build_timeline, markers};
use playback::types::{Message, SessionTimeline};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ReplayConfig::from_env();
    let log = EventLog::load(&config.replay_csv)
        .with_context(|| format!("failed to load {}", config.replay_csv.display()))?;
    let directory = match ParticipantDirectory::load(&config.participant_csv) {
        Ok(directory) => directory,
        Err(e) => {
            warn!(
                err = %e,
                path = %config.participant_csv.display(),
                "participant info unavailable; stats default to zero"
            );
            ParticipantDirectory::default()
        }
    };

    let bind_addr = config.dashboard_bind.clone();
    let app = router(Arc::new(AppState {
        config,
        log,
        directory,
    }));

    info!("replay dashboard listening on http://{bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

struct AppState {
    config: ReplayConfig,
    log: EventLog,
    directory: ParticipantDirectory,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/participants", get(list_participants))
        .route("/api/participants/:id", get(get_participant))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/speeds", get(list_speeds))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, String)>;

fn api_error(err: ReplayError) -> (StatusCode, String) {
    let status = match err {
        ReplayError::InvalidParticipant(_) => StatusCode::BAD_REQUEST,
        ReplayError::NoDataForParticipant { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

async fn list_participants(State(state): State<Arc<AppState>>) -> Json<Vec<ParticipantOption>> {
    Json(state.directory.options(state.config.participant_count))
}

async fn list_speeds() -> Json<Vec<f64>> {
    Json(SPEED_CHOICES.to_vec())
}

#[derive(Serialize)]
struct ParticipantPanel {
    id: i64,
    label: String,
    stats: ParticipantStats,
    user_word_share: f64,
    gpt_word_share: f64,
    likert_max: f64,
    total_time_label: String,
    missing_fields: Vec<String>,
}

async fn get_participant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ParticipantPanel> {
    let id = parse_participant(&id).map_err(api_error)?;
    let info = state.directory.get(id);
    let stats = state.directory.stats(id);

    Ok(Json(ParticipantPanel {
        id,
        label: participant_label(id, info),
        user_word_share: stats.word_share(stats.user_words),
        gpt_word_share: stats.word_share(stats.gpt_words),
        likert_max: LIKERT_MAX,
        total_time_label: stats.total_time_label(),
        missing_fields: info.map(|p| p.missing_fields.clone()).unwrap_or_default(),
        stats,
    }))
}

#[derive(Serialize)]
struct SessionPayload {
    essay_id: i64,
    rows: usize,
    timeline: SessionTimeline,
    markers: Vec<TimelineMarker>,
    messages: Vec<Message>,
    operations: usize,
    malformed: usize,
    empty_payloads: usize,
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SessionPayload> {
    let essay_id = parse_participant(&id).map_err(api_error)?;
    let rows = state.log.session_rows(essay_id).map_err(api_error)?;

    let timeline = build_timeline(rows, &state.config.timeline);
    let messages = collect_messages(rows, &timeline.paste_records);
    let (_, BatchStats {
        operations,
        malformed,
        empty_payloads,
    }) = build_batch(rows, 0);

    Ok(Json(SessionPayload {
        essay_id,
        rows: rows.len(),
        markers: markers(&timeline),
        timeline,
        messages,
        operations,
        malformed,
        empty_payloads,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: &str = "\
idx,essay_num,op_index,time,op_loc,op_type,current_editor,add,delete,selected_text,cursor_location,recording_obj
0,0,0,0.0,editor,+input,,,,,,\"{'t': 0, 'o': [{'i': 0, 'a': 'Hi'}]}\"
1,0,1,12.0,gpt,gpt_inquiry,,,,rewrite Hi,,
2,0,2,20.0,gpt,gpt_response,,,,Hello,,
3,0,3,30.0,editor,y,,,,,,
4,0,4,40.0,editor,+input,,,,,,\"{'t': 40000, 'o': [{'i': 0, 'a': 'bro\"
";

    const PART_INFO: &str = "\
id,Gender,Age,Race,po,user_words,gpt_words,total_words,self_efficacy,tam_overall,csi_total,gpt_inquiry,total_time,user_percent
0,Female,29,Black,6,80,20,100,5,5,5,1,40,80
";

    fn state() -> State<Arc<AppState>> {
        State(Arc::new(AppState {
            config: ReplayConfig::default(),
            log: EventLog::from_reader(EVENTS.as_bytes()).unwrap(),
            directory: ParticipantDirectory::from_reader(PART_INFO.as_bytes()).unwrap(),
        }))
    }

    #[tokio::test]
    async fn participants_cover_the_configured_count() {
        let Json(options) = list_participants(state()).await;
        assert_eq!(options.len(), 77);
        assert_eq!(options[0].label, "Participant 1 (Black, Female, 29)");
    }

    #[tokio::test]
    async fn participant_panel_reports_shares() {
        let Json(panel) = get_participant(state(), Path("p0".to_string()))
            .await
            .unwrap();
        assert_eq!(panel.user_word_share, 0.8);
        assert_eq!(panel.total_time_label, "0m 40s");

        let Err((status, _)) = get_participant(state(), Path("nobody".to_string())).await else {
            panic!("expected a bad request");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_payload_skips_malformed_rows() {
        let Json(session) = get_session(state(), Path("0".to_string())).await.unwrap();
        assert_eq!(session.rows, 5);
        assert_eq!(session.operations, 1);
        assert_eq!(session.malformed, 1);
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.markers.len(), 2);
        assert_eq!(session.timeline.total_duration, 40.0);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let Err((status, _)) = get_session(state(), Path("p9".to_string())).await else {
            panic!("expected not found");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
