//! Size-bounded, append-only record stream for inspection data.
//!
//! Appends are at-least-once: an append whose reply is lost is retried and
//! may leave a duplicate record in the stream.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broker::{EntryId, MessageStream, StreamError};
use crate::connector::RetryPolicy;
use crate::record::StreamRecord;
use crate::session::InspectionSession;

/// Default append policy: 3 attempts, 100 ms apart.
pub const DEFAULT_APPEND_RETRY: RetryPolicy = RetryPolicy::bounded(3, Duration::from_millis(100));

#[derive(Error, Debug)]
pub enum RecordStreamError {
    #[error("Append to {stream} failed after {attempts} attempts: {source}")]
    Exhausted {
        stream: String,
        attempts: u64,
        source: StreamError,
    },

    #[error("Session {0} is already completed")]
    SessionCompleted(String),
}

pub type RecordStreamResult<T> = Result<T, RecordStreamError>;

pub struct BoundedRecordStream<S> {
    stream: S,
    name: String,
    cap: usize,
    retry: RetryPolicy,
}

impl<S: MessageStream> BoundedRecordStream<S> {
    /// Stream `name` trimmed to about `cap` entries (at least one).
    pub fn new(stream: S, name: impl Into<String>, cap: usize) -> Self {
        Self {
            stream,
            name: name.into(),
            cap: cap.max(1),
            retry: DEFAULT_APPEND_RETRY,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Append `record` for `session_id`, retrying transient errors.
    pub fn append(&mut self, session_id: &str, record: &StreamRecord) -> RecordStreamResult<EntryId> {
        let fields = record.to_wire();
        let name = self.name.as_str();
        let cap = self.cap;
        let stream = &mut self.stream;

        self.retry
            .run(
                || stream.append(name, &fields, Some(cap)),
                |attempt, e| warn!("Append {attempt} for session {session_id} to {name} failed: {e}"),
            )
            .map_err(|exhausted| RecordStreamError::Exhausted {
                stream: name.to_string(),
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            })
    }

    /// Append one JPEG frame and advance the session's sequence.
    ///
    /// The sequence advances even when the frame is dropped after exhausting
    /// its retries, so a gap marks the loss.
    pub fn append_frame(
        &mut self,
        session: &mut InspectionSession,
        jpeg: Vec<u8>,
    ) -> RecordStreamResult<EntryId> {
        if !session.is_active() {
            return Err(RecordStreamError::SessionCompleted(
                session.session_id().to_string(),
            ));
        }

        let sequence = session.advance_sequence();
        let record = StreamRecord::image(session, sequence, jpeg);
        let id = self.append(session.session_id(), &record)?;
        debug!("Appended {} as {id}", session.image_name(sequence));
        Ok(id)
    }

    /// Append the terminal record and mark the session completed.
    ///
    /// Best effort: on failure the error is logged and the session is still
    /// completed. Calling this on a completed session does nothing.
    pub fn complete(&mut self, session: &mut InspectionSession) -> Option<EntryId> {
        if !session.is_active() {
            return None;
        }

        let sequence = session.peek_sequence();
        let record = StreamRecord::terminal(session, sequence);
        let result = self.append(session.session_id(), &record);
        session.mark_completed();

        match result {
            Ok(id) => {
                info!(
                    "Inspection {} completed after {} records",
                    session.session_id(),
                    sequence - 1
                );
                Some(id)
            }
            Err(e) => {
                error!(
                    "Could not append terminal record for {}: {e}",
                    session.session_id()
                );
                None
            }
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
