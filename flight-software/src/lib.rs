//! Flight software for autonomous aerial inspections.
//!
//! Three long-running workers cooperate only through the message stream and
//! the vehicle's own state:
//!
//! - [`workers::FlightWorker`] plans the coverage path and flies it
//! - [`workers::TelemetryWorker`] publishes vehicle state to the metrics sink
//! - [`workers::CaptureWorker`] waits for a start signal, then streams images
//!
//! Each worker owns its dependency connections, obtained through the
//! [`connector::Connector`] retry policy.

pub mod broker;
pub mod config;
pub mod connector;
pub mod gate;
pub mod metrics;
pub mod record;
pub mod record_stream;
pub mod session;
pub mod shutdown;
pub mod workers;

pub use connector::{ConnectError, Connector, Dependency, RetryPolicy};
pub use shutdown::ShutdownSignal;
