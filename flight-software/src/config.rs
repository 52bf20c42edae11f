//! Pipeline configuration.
//!
//! Tunables live in `pipeline.json` next to the survey plan in the
//! [`ConfigStorage`] directory; endpoints come from the command line or the
//! environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};
use shared::config_storage::{ConfigError, ConfigResult, ConfigStorage};
use tracing::info;

use crate::connector::RetryPolicy;
use crate::gate::GateConfig;
use crate::workers::{CaptureConfig, TelemetryConfig};

pub const PIPELINE_CONFIG_FILE: &str = "pipeline.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub signal_stream: String,
    pub data_stream: String,
    pub group: String,
    pub consumer: String,
    /// Approximate cap of the data stream
    pub max_images: usize,
    pub poll_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub capture_period_ms: u64,
    pub telemetry_period_ms: u64,
    pub control_poll_ms: u64,
    pub append_attempts: u32,
    pub append_backoff_ms: u64,
    pub telemetry_topic: String,
    pub measurement: String,
    pub client_id: String,
    pub camera: String,
    pub jpeg_quality: u8,
    /// Fields added to every record unless the start signal overrides them
    pub default_context: Vec<(String, String)>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            signal_stream: "inspection".to_string(),
            data_stream: "inspectiondata".to_string(),
            group: "InspectionGroup".to_string(),
            consumer: "InspectionConsumer".to_string(),
            max_images: 50,
            poll_interval_ms: 10_000,
            retry_delay_ms: 1_000,
            capture_period_ms: 2_000,
            telemetry_period_ms: 100,
            control_poll_ms: 1_000,
            append_attempts: 3,
            append_backoff_ms: 100,
            telemetry_topic: "iot_center".to_string(),
            measurement: "environment".to_string(),
            client_id: "drone".to_string(),
            camera: "1".to_string(),
            jpeg_quality: 90,
            default_context: vec![
                ("weather".to_string(), "Sunny".to_string()),
                ("windSpeed".to_string(), "5".to_string()),
            ],
        }
    }
}

impl PipelineConfig {
    /// Load `pipeline.json`, falling back to defaults when it does not exist.
    ///
    /// Zero intervals are rejected: a zero Redis block time waits forever and
    /// a zero loop period spins.
    pub fn load(storage: &ConfigStorage) -> ConfigResult<Self> {
        match storage.load_json::<Self>(PIPELINE_CONFIG_FILE) {
            Some(config) => {
                let config = config?;
                config.validate().map_err(|reason| ConfigError::Invalid {
                    path: storage.root_path().join(PIPELINE_CONFIG_FILE),
                    reason,
                })?;
                Ok(config)
            }
            None => {
                info!(
                    "No {PIPELINE_CONFIG_FILE} in {}, using defaults",
                    storage.root_path().display()
                );
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let intervals = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("capture_period_ms", self.capture_period_ms),
            ("telemetry_period_ms", self.telemetry_period_ms),
            ("control_poll_ms", self.control_poll_ms),
        ];
        match intervals.iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(format!("{name} must be at least 1")),
            None => Ok(()),
        }
    }

    pub fn save(&self, storage: &ConfigStorage) -> ConfigResult<PathBuf> {
        storage.save_json(PIPELINE_CONFIG_FILE, self)
    }

    pub fn control_poll(&self) -> Duration {
        Duration::from_millis(self.control_poll_ms)
    }

    pub fn append_retry(&self) -> RetryPolicy {
        RetryPolicy::bounded(
            self.append_attempts,
            Duration::from_millis(self.append_backoff_ms),
        )
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            signal_stream: self.signal_stream.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ack_retry: self.append_retry(),
            default_context: self.default_context.clone(),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            gate: self.gate_config(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            data_stream: self.data_stream.clone(),
            max_images: self.max_images,
            period: Duration::from_millis(self.capture_period_ms),
            append_retry: self.append_retry(),
            camera: self.camera.clone(),
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            period: Duration::from_millis(self.telemetry_period_ms),
            topic: self.telemetry_topic.clone(),
            measurement: self.measurement.clone(),
            client_id: self.client_id.clone(),
            control_poll: self.control_poll(),
        }
    }
}

/// Broker endpoints.
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// Redis host carrying the signal and data streams
    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    pub redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    /// MQTT broker receiving telemetry
    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,
}

/// Location of the JSON configuration files.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Configuration directory (default: ~/.inspection_config)
    #[arg(long)]
    pub config_dir: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn storage(&self) -> ConfigResult<ConfigStorage> {
        match &self.config_dir {
            Some(dir) => Ok(ConfigStorage::with_path(dir.clone())),
            None => ConfigStorage::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        let capture = config.capture_config();
        assert_eq!(capture.gate.signal_stream, "inspection");
        assert_eq!(capture.data_stream, "inspectiondata");
        assert_eq!(capture.max_images, 50);
        assert_eq!(capture.period, Duration::from_secs(2));
        assert_eq!(capture.gate.poll_interval, Duration::from_secs(10));
        assert_eq!(
            config.telemetry_config().period,
            Duration::from_millis(100)
        );
        assert_eq!(config.append_retry().max_attempts, Some(3));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let storage = ConfigStorage::with_path(dir.path().to_path_buf());
        assert_eq!(
            PipelineConfig::load(&storage).unwrap(),
            PipelineConfig::default()
        );
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(PIPELINE_CONFIG_FILE),
            r#"{"max_images": 7, "default_context": [["weather", "Rain"]]}"#,
        )
        .unwrap();
        let storage = ConfigStorage::with_path(dir.path().to_path_buf());

        let config = PipelineConfig::load(&storage).unwrap();
        assert_eq!(config.max_images, 7);
        assert_eq!(
            config.default_context,
            vec![("weather".to_string(), "Rain".to_string())]
        );
        assert_eq!(config.data_stream, "inspectiondata");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let storage = ConfigStorage::with_path(dir.path().to_path_buf());
        let config = PipelineConfig {
            capture_period_ms: 500,
            ..Default::default()
        };
        config.save(&storage).unwrap();
        assert_eq!(PipelineConfig::load(&storage).unwrap(), config);
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = ConfigStorage::with_path(dir.path().to_path_buf());
        for field in ["poll_interval_ms", "capture_period_ms", "telemetry_period_ms"] {
            std::fs::write(
                dir.path().join(PIPELINE_CONFIG_FILE),
                format!(r#"{{"{field}": 0}}"#),
            )
            .unwrap();
            match PipelineConfig::load(&storage) {
                Err(ConfigError::Invalid { reason, .. }) => assert!(reason.contains(field)),
                other => panic!("{field} = 0 loaded as {other:?}"),
            }
        }
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PIPELINE_CONFIG_FILE), "not json").unwrap();
        let storage = ConfigStorage::with_path(dir.path().to_path_buf());
        assert!(PipelineConfig::load(&storage).is_err());
    }
}
