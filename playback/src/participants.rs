//! Participant demographics and aggregate statistics (`part_info.csv`).

use crate::error::{ReplayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

static RE_PARTICIPANT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[pP]?(\d+)\s*$").unwrap());

/// Upper bound for the Likert-style statistics (perceived ownership, self-efficacy, TAM, CSI).
pub const LIKERT_MAX: f64 = 7.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParticipantStats {
    pub perceived_ownership: f64,
    pub user_words: f64,
    pub gpt_words: f64,
    pub total_words: f64,
    pub self_efficacy: f64,
    pub tam_overall: f64,
    pub csi_total: f64,
    pub gpt_inquiry: f64,
    pub total_time: f64,
    pub user_percent: f64,
}

impl ParticipantStats {
    /// Share of `total_words` as a bar fraction; a zero total counts as one word.
    pub fn word_share(&self, words: f64) -> f64 {
        (words / self.total_words.max(1.0)).clamp(0.0, 1.0)
    }

    /// `"{m}m {s}s"` rendering of the total session time.
    pub fn total_time_label(&self) -> String {
        let minutes = (self.total_time / 60.0).floor();
        let seconds = (self.total_time % 60.0).round();
        format!("{minutes}m {seconds}s")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParticipantInfo {
    pub id: i64,
    pub gender: Option<String>,
    pub age: Option<String>,
    pub race: Option<String>,
    pub stats: ParticipantStats,
    /// Stat columns that were absent or unparseable and defaulted to zero.
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantOption {
    pub value: String,
    pub essay_id: i64,
    pub label: String,
}

/// Stat column → setter. Column names follow the study export.
const STAT_COLUMNS: [(&str, fn(&mut ParticipantStats, f64)); 10] = [
    ("po", |s, v| s.perceived_ownership = v),
    ("user_words", |s, v| s.user_words = v),
    ("gpt_words", |s, v| s.gpt_words = v),
    ("total_words", |s, v| s.total_words = v),
    ("self_efficacy", |s, v| s.self_efficacy = v),
    ("tam_overall", |s, v| s.tam_overall = v),
    ("csi_total", |s, v| s.csi_total = v),
    ("gpt_inquiry", |s, v| s.gpt_inquiry = v),
    ("total_time", |s, v| s.total_time = v),
    ("user_percent", |s, v| s.user_percent = v),
];

#[derive(Debug, Clone, Default)]
pub struct ParticipantDirectory {
    by_id: BTreeMap<i64, ParticipantInfo>,
}

impl ParticipantDirectory {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

        let id_col = column("id");
        let gender_col = column("Gender");
        let age_col = column("Age");
        let race_col = column("Race");
        let stat_cols: Vec<_> = STAT_COLUMNS
            .iter()
            .map(|(name, set)| (*name, column(name), *set))
            .collect();

        let mut by_id = BTreeMap::new();
        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(err = %e, "skipping unreadable participant record");
                    continue;
                }
            };
            let cell = |idx: Option<usize>| {
                idx.and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            };

            let Some(id) = cell(id_col).and_then(|s| s.parse::<f64>().ok()).map(|v| v as i64)
            else {
                continue;
            };

            let mut info = ParticipantInfo {
                id,
                gender: cell(gender_col).map(str::to_string),
                age: cell(age_col).map(str::to_string),
                race: cell(race_col).map(str::to_string),
                ..Default::default()
            };

            for (name, idx, set) in &stat_cols {
                match cell(*idx).and_then(|s| s.parse::<f64>().ok()) {
                    Some(v) if v.is_finite() => set(&mut info.stats, v),
                    _ => {
                        let missing = ReplayError::StatFieldMissing {
                            participant: id,
                            field: name.to_string(),
                        };
                        debug!(err = %missing, "defaulting stat to zero");
                        info.missing_fields.push(name.to_string());
                    }
                }
            }

            by_id.insert(id, info);
        }

        Ok(Self { by_id })
    }

    pub fn get(&self, id: i64) -> Option<&ParticipantInfo> {
        self.by_id.get(&id)
    }

    /// Stats for a participant; unknown participants get all-zero stats.
    pub fn stats(&self, id: i64) -> ParticipantStats {
        self.get(id).map(|p| p.stats.clone()).unwrap_or_default()
    }

    /// Selector entries for participant ids `0..count`.
    pub fn options(&self, count: usize) -> Vec<ParticipantOption> {
        (0..count as i64)
            .map(|id| ParticipantOption {
                value: format!("p{id}"),
                essay_id: id,
                label: participant_label(id, self.get(id)),
            })
            .collect()
    }
}

pub fn participant_label(id: i64, info: Option<&ParticipantInfo>) -> String {
    match info {
        Some(p) => format!(
            "Participant {} ({}, {}, {})",
            id + 1,
            p.race.as_deref().unwrap_or("unknown"),
            p.gender.as_deref().unwrap_or("unknown"),
            p.age.as_deref().unwrap_or("unknown"),
        ),
        None => format!("Participant {}", id + 1),
    }
}

/// Accepts `p3`, `P3` or `3`.
pub fn parse_participant(raw: &str) -> Result<i64> {
    RE_PARTICIPANT
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .ok_or_else(|| ReplayError::InvalidParticipant(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PART_INFO: &str = "\
id,Gender,Age,Race,po,user_words,gpt_words,total_words,self_efficacy,tam_overall,csi_total,gpt_inquiry,total_time,user_percent
0,Female,24,Asian,5.5,300,100,400,6.1,5.0,4.2,3,1830.4,75.0
1,Male,31,White,n/a,,50,50,4,4,4,1,600,0
";

    #[test]
    fn parses_stats_and_defaults_missing_fields() {
        let dir = ParticipantDirectory::from_reader(PART_INFO.as_bytes()).unwrap();

        let first = dir.get(0).unwrap();
        assert_eq!(first.stats.perceived_ownership, 5.5);
        assert_eq!(first.stats.total_words, 400.0);
        assert!(first.missing_fields.is_empty());
        assert_eq!(first.stats.total_time_label(), "30m 30s");

        let second = dir.get(1).unwrap();
        assert_eq!(second.stats.perceived_ownership, 0.0);
        assert_eq!(second.stats.user_words, 0.0);
        assert_eq!(second.missing_fields, vec!["po", "user_words"]);
    }

    #[test]
    fn options_fall_back_to_plain_labels() {
        let dir = ParticipantDirectory::from_reader(PART_INFO.as_bytes()).unwrap();
        let options = dir.options(3);
        assert_eq!(options.len(), 3);
        assert_eq!(options[0].value, "p0");
        assert_eq!(options[0].label, "Participant 1 (Asian, Female, 24)");
        assert_eq!(options[2].label, "Participant 3");
    }

    #[test]
    fn unknown_participant_has_zero_stats() {
        let dir = ParticipantDirectory::from_reader(PART_INFO.as_bytes()).unwrap();
        assert_eq!(dir.stats(42), ParticipantStats::default());
    }

    #[test]
    fn word_share_guards_zero_total() {
        let stats = ParticipantStats {
            user_words: 10.0,
            ..Default::default()
        };
        assert_eq!(stats.word_share(stats.user_words), 1.0);
    }

    #[test]
    fn participant_params_parse() {
        assert_eq!(parse_participant("p3").unwrap(), 3);
        assert_eq!(parse_participant("12").unwrap(), 12);
        assert!(parse_participant("participant-3").is_err());
    }
}
