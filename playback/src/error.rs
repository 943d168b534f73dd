use thiserror::Error;

pub type Result<T, E = ReplayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// A row's encoded payload could not be turned into structured data.
    /// Recovered locally: the row is dropped from its batch.
    #[error("malformed record at row {row} (essay {essay_id}): {reason}")]
    MalformedRecord {
        essay_id: i64,
        row: usize,
        reason: String,
    },

    #[error("no replay rows for participant (essay {essay_id})")]
    NoDataForParticipant { essay_id: i64 },

    #[error("editor surface not ready after {attempts} attempts at {interval_ms}ms")]
    EditorInitTimeout { attempts: u32, interval_ms: u64 },

    #[error("participant {participant}: stat field `{field}` missing or unparseable")]
    StatFieldMissing { participant: i64, field: String },

    #[error("a seek is already in progress")]
    SeekInProgress,

    #[error("session load superseded by a newer selection")]
    Superseded,

    #[error("session driver is no longer running")]
    DriverClosed,

    #[error("invalid participant id `{0}`")]
    InvalidParticipant(String),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReplayError {
    pub(crate) fn malformed(essay_id: i64, row: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            essay_id,
            row,
            reason: reason.into(),
        }
    }

    /// Errors that end a session load. Everything else is recovered where it happens.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::NoDataForParticipant { .. } | Self::EditorInitTimeout { .. }
        )
    }
}
