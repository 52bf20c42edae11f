//! Blocks until an inspection start signal arrives on the signal stream.
//!
//! The gate is a small state machine run once per session:
//!
//! ```text
//! Uninitialized --group ready--> Waiting --entry read--> SessionReceived --acked--> Terminal
//! ```
//!
//! Group creation and reads are retried indefinitely; only a shutdown request
//! or a signal without an inspection id ends a cycle without a session.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broker::{EntryId, MessageStream, StartPosition, StreamEntry, StreamError};
use crate::connector::RetryPolicy;
use crate::record::{is_reserved_field, FIELD_INSPECTION_ID};
use crate::session::{merge_context, InspectionSession};
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Uninitialized,
    Waiting,
    SessionReceived,
    Terminal,
}

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Start signal {entry_id} has no inspectionId field")]
    MissingSessionId { entry_id: EntryId },

    #[error("Shutdown requested while waiting for a start signal")]
    Cancelled,
}

pub type GateResult<T> = Result<T, GateError>;

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub signal_stream: String,
    /// Upper bound of one blocking read
    pub poll_interval: Duration,
    /// Pause after a failed group creation or read
    pub retry_delay: Duration,
    pub ack_retry: RetryPolicy,
    /// Context fields used when the signal does not carry them
    pub default_context: Vec<(String, String)>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            signal_stream: "inspection".to_string(),
            poll_interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
            ack_retry: RetryPolicy::bounded(3, Duration::from_millis(100)),
            default_context: Vec::new(),
        }
    }
}

pub struct SessionSignalGate<S> {
    stream: S,
    config: GateConfig,
    state: GateState,
    shutdown: ShutdownSignal,
}

impl<S: MessageStream> SessionSignalGate<S> {
    pub fn new(stream: S, config: GateConfig) -> Self {
        Self {
            stream,
            config,
            state: GateState::Uninitialized,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Wait for the next start signal delivered to `group` and return the
    /// session it opens. The signal is acknowledged before returning.
    pub fn await_session(&mut self, group: &str, consumer: &str) -> GateResult<InspectionSession> {
        self.state = GateState::Uninitialized;
        self.ensure_group(group)?;

        self.state = GateState::Waiting;
        info!(
            "Waiting for an inspection start signal on {}",
            self.config.signal_stream
        );
        let entry = self.wait_for_signal(group, consumer)?;

        self.state = GateState::SessionReceived;
        self.acknowledge(group, &entry.id);
        let session = self.open_session(entry)?;

        self.state = GateState::Terminal;
        info!("Inspection {} started", session.session_id());
        Ok(session)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn check_shutdown(&self) -> GateResult<()> {
        if self.shutdown.is_triggered() {
            return Err(GateError::Cancelled);
        }
        Ok(())
    }

    fn pause(&self) -> GateResult<()> {
        let deadline = std::time::Instant::now() + self.config.retry_delay;
        if !self.shutdown.sleep_until(deadline) {
            return Err(GateError::Cancelled);
        }
        Ok(())
    }

    fn ensure_group(&mut self, group: &str) -> GateResult<()> {
        loop {
            self.check_shutdown()?;
            match self.stream.create_consumer_group(
                &self.config.signal_stream,
                group,
                StartPosition::NewOnly,
                true,
            ) {
                Ok(()) => {
                    info!(
                        "Created consumer group {group} on {}",
                        self.config.signal_stream
                    );
                    return Ok(());
                }
                Err(StreamError::GroupExists { .. }) => {
                    debug!("Consumer group {group} already exists");
                    return Ok(());
                }
                Err(e) => {
                    error!("Could not create consumer group {group}: {e}");
                    self.pause()?;
                }
            }
        }
    }

    fn wait_for_signal(&mut self, group: &str, consumer: &str) -> GateResult<StreamEntry> {
        loop {
            self.check_shutdown()?;
            match self.stream.read_group(
                &self.config.signal_stream,
                group,
                consumer,
                self.config.poll_interval,
            ) {
                Ok(Some(entry)) => return Ok(entry),
                Ok(None) => debug!("No start signal yet"),
                Err(e) => {
                    error!("Reading start signals failed: {e}");
                    self.pause()?;
                }
            }
        }
    }

    fn acknowledge(&mut self, group: &str, id: &EntryId) {
        let stream_name = self.config.signal_stream.as_str();
        let stream = &mut self.stream;
        let result = self.config.ack_retry.run(
            || stream.ack(stream_name, group, id),
            |attempt, e| warn!("Ack {attempt} of start signal {id} failed: {e}"),
        );
        if let Err(exhausted) = result {
            error!(
                "Start signal {id} left unacknowledged after {} attempts: {}",
                exhausted.attempts, exhausted.last_error
            );
        }
    }

    fn open_session(&self, entry: StreamEntry) -> GateResult<InspectionSession> {
        let Some(session_id) = entry.get_str(FIELD_INSPECTION_ID).map(str::to_string) else {
            warn!("Start signal {} carries no {FIELD_INSPECTION_ID}", entry.id);
            return Err(GateError::MissingSessionId { entry_id: entry.id });
        };

        let entry_id = entry.id;
        let defaults: Vec<_> = self
            .config
            .default_context
            .iter()
            .filter(|(key, _)| keep_context_field(key, "default context"))
            .cloned()
            .collect();
        let source = format!("start signal {entry_id}");
        let signal_fields = entry
            .fields
            .into_iter()
            .filter(|(key, _)| key != FIELD_INSPECTION_ID)
            .filter(|(key, _)| keep_context_field(key, &source))
            .map(|(key, value)| (key, String::from_utf8_lossy(&value).into_owned()));
        let context = merge_context(&defaults, signal_fields);

        Ok(InspectionSession::new(session_id, entry_id, context))
    }
}

/// Context keys may not shadow the fields the record stream writes.
fn keep_context_field(key: &str, source: &str) -> bool {
    if is_reserved_field(key) {
        warn!("Ignoring reserved field {key} from {source}");
        return false;
    }
    true
}
