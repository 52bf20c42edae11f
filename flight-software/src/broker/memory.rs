//! In-process broker with stream semantics, used by tests and the offline
//! pipeline.
//!
//! Supports consumer groups with pending lists, blocking reads, approximate
//! trimming and failure injection.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{EntryId, Fields, MessageStream, StartPosition, StreamEntry, StreamError, StreamResult};

/// Entries above the cap tolerated before an approximate trim kicks in.
const TRIM_SLACK: usize = 4;

/// Where an injected append failure happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendFailure {
    /// The entry is rejected
    BeforeCommit,
    /// The entry is stored but the reply is lost
    AfterCommit,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: u64,
    /// Delivered, unacknowledged entries and their consumer
    pending: BTreeMap<u64, String>,
}

#[derive(Debug, Default)]
struct StreamLog {
    entries: VecDeque<(u64, StreamEntry)>,
    last_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug, Default)]
struct BrokerState {
    streams: HashMap<String, StreamLog>,
    refused_connections: usize,
    failing_appends: VecDeque<AppendFailure>,
    failing_reads: usize,
    failing_acks: usize,
    failing_group_creates: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    appended: Condvar,
}

/// Shared broker state. Clones refer to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a connection.
    pub fn connect(&self) -> StreamResult<MemoryStream> {
        let mut state = self.lock();
        if state.refused_connections > 0 {
            state.refused_connections -= 1;
            return Err(StreamError::Connection("connection refused".to_string()));
        }
        Ok(MemoryStream {
            broker: self.clone(),
        })
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connections(&self, count: usize) {
        self.lock().refused_connections = count;
    }

    /// Fail upcoming appends, one entry per failing call.
    pub fn fail_appends(&self, failures: impl IntoIterator<Item = AppendFailure>) {
        self.lock().failing_appends.extend(failures);
    }

    pub fn fail_reads(&self, count: usize) {
        self.lock().failing_reads = count;
    }

    pub fn fail_acks(&self, count: usize) {
        self.lock().failing_acks = count;
    }

    pub fn fail_group_creates(&self, count: usize) {
        self.lock().failing_group_creates = count;
    }

    /// Entries currently retained in `stream`, oldest first.
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.lock()
            .streams
            .get(stream)
            .map(|log| log.entries.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, stream: &str) -> usize {
        self.lock()
            .streams
            .get(stream)
            .map(|log| log.entries.len())
            .unwrap_or(0)
    }

    pub fn has_group(&self, stream: &str, group: &str) -> bool {
        self.lock()
            .streams
            .get(stream)
            .map(|log| log.groups.contains_key(group))
            .unwrap_or(false)
    }

    /// Delivered but unacknowledged entries of `group`.
    pub fn pending(&self, stream: &str, group: &str) -> usize {
        self.lock()
            .streams
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }
}

/// One connection to a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryStream {
    broker: MemoryBroker,
}

impl MemoryStream {
    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

fn parse_seq(id: &EntryId) -> Option<u64> {
    id.as_str().split('-').next()?.parse().ok()
}

impl MessageStream for MemoryStream {
    fn create_consumer_group(
        &mut self,
        stream: &str,
        group: &str,
        start: StartPosition,
        create_stream: bool,
    ) -> StreamResult<()> {
        let mut state = self.broker.lock();
        if state.failing_group_creates > 0 {
            state.failing_group_creates -= 1;
            return Err(StreamError::Connection("connection reset".to_string()));
        }

        if !state.streams.contains_key(stream) {
            if !create_stream {
                return Err(StreamError::Command {
                    command: "XGROUP CREATE",
                    reason: format!("stream {stream} does not exist"),
                });
            }
            state.streams.insert(stream.to_string(), StreamLog::default());
        }

        let log = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| StreamError::Protocol(format!("stream {stream} vanished")))?;
        if log.groups.contains_key(group) {
            return Err(StreamError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }

        let last_delivered = match start {
            StartPosition::NewOnly => log.last_seq,
            StartPosition::Beginning => 0,
        };
        log.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn read_group(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> StreamResult<Option<StreamEntry>> {
        let deadline = Instant::now() + block;
        let mut state = self.broker.lock();

        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(StreamError::Connection("connection reset".to_string()));
        }

        loop {
            let log = state.streams.get_mut(stream).ok_or_else(|| StreamError::Command {
                command: "XREADGROUP",
                reason: format!("no such key {stream}"),
            })?;
            let group_state = log.groups.get_mut(group).ok_or_else(|| StreamError::Command {
                command: "XREADGROUP",
                reason: format!("no consumer group {group} on {stream}"),
            })?;

            let next = log
                .entries
                .iter()
                .find(|(seq, _)| *seq > group_state.last_delivered);
            if let Some((seq, entry)) = next {
                group_state.last_delivered = *seq;
                group_state.pending.insert(*seq, consumer.to_string());
                return Ok(Some(entry.clone()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .broker
                .shared
                .appended
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn ack(&mut self, stream: &str, group: &str, id: &EntryId) -> StreamResult<u64> {
        let mut state = self.broker.lock();
        if state.failing_acks > 0 {
            state.failing_acks -= 1;
            return Err(StreamError::Connection("connection reset".to_string()));
        }

        let removed = parse_seq(id)
            .and_then(|seq| {
                state
                    .streams
                    .get_mut(stream)?
                    .groups
                    .get_mut(group)?
                    .pending
                    .remove(&seq)
            })
            .is_some();
        Ok(u64::from(removed))
    }

    fn append(
        &mut self,
        stream: &str,
        fields: &[(String, Vec<u8>)],
        approx_cap: Option<usize>,
    ) -> StreamResult<EntryId> {
        let mut state = self.broker.lock();
        let failure = state.failing_appends.pop_front();
        if failure == Some(AppendFailure::BeforeCommit) {
            return Err(StreamError::Connection("connection reset".to_string()));
        }

        let log = state.streams.entry(stream.to_string()).or_default();
        log.last_seq += 1;
        let seq = log.last_seq;
        let id = EntryId::new(format!("{seq}-0"));
        let fields: Fields = fields.to_vec();
        log.entries.push_back((
            seq,
            StreamEntry {
                id: id.clone(),
                fields,
            },
        ));

        if let Some(cap) = approx_cap {
            if log.entries.len() > cap + TRIM_SLACK {
                let excess = log.entries.len() - cap;
                log.entries.drain(..excess);
            }
        }

        self.broker.shared.appended.notify_all();

        if failure == Some(AppendFailure::AfterCommit) {
            return Err(StreamError::Connection("reply lost".to_string()));
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, value: &str) -> (String, Vec<u8>) {
        (name.to_string(), value.as_bytes().to_vec())
    }

    #[test]
    fn test_group_sees_only_new_entries() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().unwrap();

        conn.append("s", &[field("k", "old")], None).unwrap();
        conn.create_consumer_group("s", "g", StartPosition::NewOnly, true)
            .unwrap();
        conn.append("s", &[field("k", "new")], None).unwrap();

        let entry = conn
            .read_group("s", "g", "c", Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(entry.get_str("k"), Some("new"));
        assert!(conn
            .read_group("s", "g", "c", Duration::ZERO)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_group_is_reported() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().unwrap();

        conn.create_consumer_group("s", "g", StartPosition::NewOnly, true)
            .unwrap();
        assert!(matches!(
            conn.create_consumer_group("s", "g", StartPosition::NewOnly, true),
            Err(StreamError::GroupExists { .. })
        ));
    }

    #[test]
    fn test_missing_stream_without_mkstream() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().unwrap();
        assert!(matches!(
            conn.create_consumer_group("s", "g", StartPosition::NewOnly, false),
            Err(StreamError::Command { .. })
        ));
    }

    #[test]
    fn test_pending_until_acked() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().unwrap();
        conn.create_consumer_group("s", "g", StartPosition::NewOnly, true)
            .unwrap();
        conn.append("s", &[field("k", "v")], None).unwrap();

        let entry = conn
            .read_group("s", "g", "c", Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(broker.pending("s", "g"), 1);
        assert_eq!(conn.ack("s", "g", &entry.id).unwrap(), 1);
        assert_eq!(broker.pending("s", "g"), 0);
        assert_eq!(conn.ack("s", "g", &entry.id).unwrap(), 0);
    }

    #[test]
    fn test_blocking_read_wakes_on_append() {
        let broker = MemoryBroker::new();
        let mut reader = broker.connect().unwrap();
        reader
            .create_consumer_group("s", "g", StartPosition::NewOnly, true)
            .unwrap();

        let mut writer = broker.connect().unwrap();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            writer.append("s", &[field("k", "late")], None).unwrap();
        });

        let entry = reader
            .read_group("s", "g", "c", Duration::from_secs(5))
            .unwrap();
        thread.join().unwrap();
        assert_eq!(entry.unwrap().get_str("k"), Some("late"));
    }

    #[test]
    fn test_blocking_read_times_out() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().unwrap();
        conn.create_consumer_group("s", "g", StartPosition::NewOnly, true)
            .unwrap();

        let start = Instant::now();
        let entry = conn
            .read_group("s", "g", "c", Duration::from_millis(30))
            .unwrap();
        assert!(entry.is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_approximate_trim_keeps_newest() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().unwrap();

        for i in 0..20 {
            conn.append("s", &[field("i", &i.to_string())], Some(5))
                .unwrap();
        }

        let entries = broker.entries("s");
        assert!(entries.len() >= 5);
        assert!(entries.len() <= 5 + TRIM_SLACK);
        assert_eq!(entries.last().unwrap().get_str("i"), Some("19"));
    }

    #[test]
    fn test_failure_after_commit_still_stores() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().unwrap();
        broker.fail_appends([AppendFailure::AfterCommit, AppendFailure::BeforeCommit]);

        assert!(conn.append("s", &[field("k", "a")], None).is_err());
        assert!(conn.append("s", &[field("k", "b")], None).is_err());
        assert!(conn.append("s", &[field("k", "c")], None).is_ok());

        let values: Vec<_> = broker
            .entries("s")
            .iter()
            .map(|e| e.get_str("k").unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["a", "c"]);
    }

    #[test]
    fn test_refused_connections() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(1);
        assert!(broker.connect().is_err());
        assert!(broker.connect().is_ok());
    }
}
