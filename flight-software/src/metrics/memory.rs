use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{MetricsError, MetricsResult, MetricsSink};

#[derive(Debug, Default)]
struct Recorded {
    messages: Vec<(String, String)>,
    failing_publishes: usize,
}

/// Sink that keeps every published payload in memory.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `(topic, payload)` pairs in publish order.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.lock().messages.clone()
    }

    pub fn fail_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }
}

impl MetricsSink for RecordingSink {
    fn publish(&mut self, topic: &str, payload: &str) -> MetricsResult<()> {
        let mut recorded = self.lock();
        if recorded.failing_publishes > 0 {
            recorded.failing_publishes -= 1;
            return Err(MetricsError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        recorded
            .messages
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}
