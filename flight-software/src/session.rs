//! Inspection session state.

use crate::broker::EntryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
}

/// One inspection, from its start signal to the terminal record.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectionSession {
    session_id: String,
    stream_cursor_id: EntryId,
    /// Next sequence number to assign, starting at 1
    next_sequence: u64,
    status: SessionStatus,
    context: Vec<(String, String)>,
}

impl InspectionSession {
    pub fn new(
        session_id: impl Into<String>,
        stream_cursor_id: EntryId,
        context: Vec<(String, String)>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stream_cursor_id,
            next_sequence: 1,
            status: SessionStatus::Active,
            context,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Id of the start signal entry that opened the session.
    pub fn stream_cursor_id(&self) -> &EntryId {
        &self.stream_cursor_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Fields copied into every record of the session.
    pub fn context(&self) -> &[(String, String)] {
        &self.context
    }

    /// The sequence number the next record will carry.
    pub fn peek_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Claim the next sequence number.
    pub fn advance_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    pub fn image_name(&self, sequence: u64) -> String {
        format!("{}_{}.jpg", self.session_id, sequence)
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = SessionStatus::Completed;
    }
}

/// Merge start-signal fields over configured defaults.
///
/// Defaults keep their position when overridden; new signal fields are
/// appended in signal order.
pub fn merge_context(
    defaults: &[(String, String)],
    signal: impl IntoIterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    let mut context = defaults.to_vec();
    for (key, value) in signal {
        match context.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => context.push((key, value)),
        }
    }
    context
}
