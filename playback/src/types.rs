use serde::{Deserialize, Serialize};

/// `op_type` values carried by the event log.
pub const OP_COPY: &str = "y";
pub const OP_PASTE: &str = "p";
pub const OP_GPT_INQUIRY: &str = "gpt_inquiry";
pub const OP_GPT_RESPONSE: &str = "gpt_response";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locus {
    Editor,
    Gpt,
    /// Anything else the log carries; kept so timestamps still count toward idle detection.
    Other,
}

impl Locus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "editor" => Self::Editor,
            "gpt" => Self::Gpt,
            _ => Self::Other,
        }
    }
}

/// One validated event-log record. Built once at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEventRow {
    pub idx: Option<i64>,
    pub essay_id: i64,
    pub sequence_index: i64,
    pub timestamp: f64,
    pub locus: Locus,
    pub op_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor_snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_payload: Option<String>,
}

impl RawEventRow {
    pub fn is_editor(&self) -> bool {
        self.locus == Locus::Editor
    }

    pub fn is_checkpoint(&self) -> bool {
        self.editor_snapshot.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Copy,
    Paste,
    GptInquiry,
}

impl EventKind {
    pub fn classify(op_type: &str) -> Option<Self> {
        match op_type {
            OP_COPY => Some(Self::Copy),
            OP_PASTE => Some(Self::Paste),
            OP_GPT_INQUIRY => Some(Self::GptInquiry),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Copy => "Copy",
            Self::Paste => "Paste",
            Self::GptInquiry => "GPT Event",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub time: f64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasteRecord {
    pub text: String,
    pub destination: Locus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypingSession {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdlePeriod {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityBucket {
    pub bucket_index: usize,
    pub count: usize,
    pub normalized: f64,
}

/// Derived per-essay model. Immutable once built.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionTimeline {
    pub essay_id: i64,
    pub ordered_events: Vec<TimelineEvent>,
    pub paste_records: Vec<PasteRecord>,
    pub typing_sessions: Vec<TypingSession>,
    pub idle_periods: Vec<IdlePeriod>,
    pub activity_density: Vec<DensityBucket>,
    pub total_duration: f64,
}

impl SessionTimeline {
    /// Timestamps of copy events, ascending.
    pub fn copy_times(&self) -> Vec<f64> {
        self.ordered_events
            .iter()
            .filter(|e| e.kind == EventKind::Copy)
            .map(|e| e.time)
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.ordered_events.iter().filter(|e| e.kind == kind).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: usize,
    pub role: Role,
    pub content: String,
    pub time: f64,
    /// Set when text pasted somewhere in the session occurs in this message.
    #[serde(default)]
    pub contains_paste: bool,
}
