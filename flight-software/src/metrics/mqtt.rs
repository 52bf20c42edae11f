//! MQTT metrics sink.

use std::thread::JoinHandle;
use std::time::Duration;

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use tracing::{debug, warn};

use super::{MetricsError, MetricsResult, MetricsSink};

const KEEP_ALIVE: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;
/// Pause after an event loop error before it reconnects.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Publishes payloads to an MQTT broker.
///
/// A background thread drives the client's event loop for the lifetime of
/// the sink.
pub struct MqttMetricsSink {
    client: Client,
    _event_loop: JoinHandle<()>,
}

impl MqttMetricsSink {
    /// Connect and wait for the broker to accept the session.
    pub fn connect(host: &str, port: u16, client_id: &str) -> MetricsResult<Self> {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        wait_for_connack(&mut connection)?;
        debug!("MQTT session established with {host}:{port}");

        let event_loop = std::thread::Builder::new()
            .name("mqtt-event-loop".to_string())
            .spawn(move || drive(connection))
            .map_err(|e| MetricsError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            _event_loop: event_loop,
        })
    }
}

fn wait_for_connack(connection: &mut Connection) -> MetricsResult<()> {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(MetricsError::Connection(e.to_string())),
        }
    }
    Err(MetricsError::Connection(
        "event loop closed before the broker answered".to_string(),
    ))
}

fn drive(mut connection: Connection) {
    for notification in connection.iter() {
        if let Err(e) = notification {
            warn!("MQTT connection error: {e}");
            std::thread::sleep(RECONNECT_DELAY);
        }
    }
    debug!("MQTT event loop finished");
}

impl MetricsSink for MqttMetricsSink {
    fn publish(&mut self, topic: &str, payload: &str) -> MetricsResult<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| MetricsError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Drop for MqttMetricsSink {
    fn drop(&mut self) {
        // The event loop thread exits once the disconnect is flushed.
        if let Err(e) = self.client.disconnect() {
            debug!("MQTT disconnect failed: {e}");
        }
    }
}
