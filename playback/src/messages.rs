//! Chat messages visible at the current clock time, and copy-event notices.

use crate::types::{
    Locus, Message, PasteRecord, RawEventRow, Role, OP_GPT_INQUIRY, OP_GPT_RESPONSE,
};

/// Full message list for a session, in emission order, with ids assigned as emitted.
pub fn collect_messages(rows: &[RawEventRow], pastes: &[PasteRecord]) -> Vec<Message> {
    let paste_texts: Vec<&str> = pastes
        .iter()
        .map(|p| p.text.trim())
        .filter(|t| !t.is_empty())
        .collect();

    rows.iter()
        .filter(|r| r.locus == Locus::Gpt)
        .filter_map(|r| {
            let role = match r.op_type.as_str() {
                OP_GPT_INQUIRY => Role::User,
                OP_GPT_RESPONSE => Role::Assistant,
                _ => return None,
            };
            Some((role, r))
        })
        .enumerate()
        .map(|(id, (role, row))| {
            let content = row.selected_text.clone().unwrap_or_default();
            let contains_paste = paste_texts.iter().any(|p| content.contains(p));
            Message {
                id,
                role,
                content,
                time: row.timestamp,
                contains_paste,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MessageSynchronizer {
    all: Vec<Message>,
    visible: Vec<Message>,
}

impl MessageSynchronizer {
    pub fn new(all: Vec<Message>) -> Self {
        Self {
            all,
            visible: Vec::new(),
        }
    }

    /// Recompute the visible set for `now`. Returns it only when its size changed.
    pub fn sync(&mut self, now: f64) -> Option<&[Message]> {
        let count = self.all.iter().filter(|m| m.time <= now).count();
        if count == self.visible.len() {
            return None;
        }
        self.visible = self.all.iter().filter(|m| m.time <= now).cloned().collect();
        Some(&self.visible)
    }

    pub fn visible(&self) -> &[Message] {
        &self.visible
    }

    pub fn total(&self) -> usize {
        self.all.len()
    }
}

/// Pointer into the ascending copy timestamps; each crossing fires one notice.
#[derive(Debug, Clone, Default)]
pub struct CopyToastTracker {
    copy_times: Vec<f64>,
    next: usize,
}

impl CopyToastTracker {
    pub fn new(copy_times: Vec<f64>) -> Self {
        Self {
            copy_times,
            next: 0,
        }
    }

    /// Timestamps of the copy events crossed since the last call.
    pub fn advance(&mut self, now: f64) -> &[f64] {
        let start = self.next;
        while self.next < self.copy_times.len() && self.copy_times[self.next] <= now {
            self.next += 1;
        }
        &self.copy_times[start..self.next]
    }

    /// Recount from scratch: events at or before `target` are already seen.
    pub fn reset_to(&mut self, target: f64) {
        self.next = self.copy_times.iter().filter(|&&t| t <= target).count();
    }

    pub fn seen(&self) -> usize {
        self.next
    }
}
