//! Telemetry publication.

use thiserror::Error;

pub mod line_protocol;
pub mod memory;
pub mod mqtt;

pub use memory::RecordingSink;
pub use mqtt::MqttMetricsSink;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metrics sink connection error: {0}")]
    Connection(String),

    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Sample has no finite field values")]
    EmptySample,
}

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Destination for telemetry payloads.
pub trait MetricsSink {
    fn publish(&mut self, topic: &str, payload: &str) -> MetricsResult<()>;
}

impl<M: MetricsSink + ?Sized> MetricsSink for Box<M> {
    fn publish(&mut self, topic: &str, payload: &str) -> MetricsResult<()> {
        (**self).publish(topic, payload)
    }
}
