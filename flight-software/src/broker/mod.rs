//! Append-only message streams with consumer groups.
//!
//! The pipeline uses two streams: a signal stream carrying inspection start
//! requests, read through a consumer group, and a data stream the capture
//! worker appends image records to.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub mod memory;
pub mod redis_stream;

pub use memory::{MemoryBroker, MemoryStream};
pub use redis_stream::RedisStream;

/// Field list of a stream entry, in insertion order.
pub type Fields = Vec<(String, Vec<u8>)>;

/// Broker-assigned identifier of a stream entry (`<millis>-<seq>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: Fields,
}

impl StreamEntry {
    /// Raw value of the first field called `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_slice())
    }

    /// Field value as UTF-8 text, `None` if absent or not valid UTF-8.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Only entries appended after the group is created
    #[default]
    NewOnly,
    /// Every entry still in the stream
    Beginning,
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Consumer group {group} already exists on {stream}")]
    GroupExists { stream: String, group: String },

    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("{command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },

    #[error("Unexpected broker reply: {0}")]
    Protocol(String),
}

pub type StreamResult<T> = Result<T, StreamError>;

/// Client of a message broker offering append-only streams.
///
/// Implementations are connections: each worker owns its own.
pub trait MessageStream {
    /// Create consumer group `group` on `stream`.
    ///
    /// Returns [`StreamError::GroupExists`] if the group is already there;
    /// callers treat that as success. With `create_stream` a missing stream
    /// is created empty.
    fn create_consumer_group(
        &mut self,
        stream: &str,
        group: &str,
        start: StartPosition,
        create_stream: bool,
    ) -> StreamResult<()>;

    /// Read at most one entry never delivered to `group`, blocking up to
    /// `block`. `Ok(None)` means the timeout elapsed.
    fn read_group(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> StreamResult<Option<StreamEntry>>;

    /// Acknowledge entry `id` for `group`, returning how many were removed
    /// from the pending list.
    fn ack(&mut self, stream: &str, group: &str, id: &EntryId) -> StreamResult<u64>;

    /// Append an entry. With `approx_cap` the stream is trimmed to roughly
    /// that many entries, oldest first.
    fn append(
        &mut self,
        stream: &str,
        fields: &[(String, Vec<u8>)],
        approx_cap: Option<usize>,
    ) -> StreamResult<EntryId>;
}

impl<S: MessageStream + ?Sized> MessageStream for Box<S> {
    fn create_consumer_group(
        &mut self,
        stream: &str,
        group: &str,
        start: StartPosition,
        create_stream: bool,
    ) -> StreamResult<()> {
        (**self).create_consumer_group(stream, group, start, create_stream)
    }

    fn read_group(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> StreamResult<Option<StreamEntry>> {
        (**self).read_group(stream, group, consumer, block)
    }

    fn ack(&mut self, stream: &str, group: &str, id: &EntryId) -> StreamResult<u64> {
        (**self).ack(stream, group, id)
    }

    fn append(
        &mut self,
        stream: &str,
        fields: &[(String, Vec<u8>)],
        approx_cap: Option<usize>,
    ) -> StreamResult<EntryId> {
        (**self).append(stream, fields, approx_cap)
    }
}
