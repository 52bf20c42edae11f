//! Configuration storage for survey and pipeline settings.
//!
//! Provides centralized storage for JSON configuration files.
//! All config is stored in ~/.inspection_config/ by default.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::survey_plan::SurveyPlan;

/// File name of the stored survey plan.
pub const SURVEY_PLAN_FILE: &str = "survey_plan.json";

/// Errors raised while loading or saving configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `HOME` is unset so the default root cannot be resolved.
    #[error("HOME not set")]
    HomeNotSet,

    /// Filesystem failure.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File exists but is not valid JSON for the requested type.
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// File parsed but holds a value the caller cannot run with.
    #[error("Invalid value in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Result type for configuration storage operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration storage manager.
///
/// Manages loading and saving of JSON configuration files
/// from a centralized directory (defaults to ~/.inspection_config/).
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    /// Root directory for all configuration (e.g., ~/.inspection_config)
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.inspection_config)
    pub fn new() -> ConfigResult<Self> {
        let home = std::env::var("HOME").map_err(|_| ConfigError::HomeNotSet)?;
        let root_path = PathBuf::from(home).join(".inspection_config");
        Ok(Self { root_path })
    }

    /// Create a new config storage with custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    /// Get the root configuration path
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn file_path(&self, file_name: &str) -> PathBuf {
        self.root_path.join(file_name)
    }

    /// Load a JSON file from the config root.
    ///
    /// Returns None if the file does not exist.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn load_json<T: DeserializeOwned>(&self, file_name: &str) -> Option<ConfigResult<T>> {
        let path = self.file_path(file_name);

        if !path.exists() {
            return None;
        }

        debug!("Loading configuration from {}", path.display());
        let result = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })
            .and_then(|text| {
                serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                    path: path.clone(),
                    source,
                })
            });
        Some(result)
    }

    /// Save a value as pretty-printed JSON in the config root.
    ///
    /// Creates the config directory if it doesn't exist.
    /// Returns the path where the file was saved.
    pub fn save_json<T: Serialize>(&self, file_name: &str, value: &T) -> ConfigResult<PathBuf> {
        std::fs::create_dir_all(&self.root_path).map_err(|source| ConfigError::Io {
            path: self.root_path.clone(),
            source,
        })?;

        let path = self.file_path(file_name);
        let text = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, text).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Delete a config file.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete(&self, file_name: &str) -> ConfigResult<bool> {
        let path = self.file_path(file_name);

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(&path).map_err(|source| ConfigError::Io { path, source })?;
        Ok(true)
    }

    // =========================================================================
    // Survey Plan
    // =========================================================================

    /// Get the stored survey plan.
    ///
    /// Returns None if no plan has been saved.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn get_survey_plan(&self) -> Option<ConfigResult<SurveyPlan>> {
        self.load_json(SURVEY_PLAN_FILE)
    }

    /// Stored survey plan, or the built-in default when none has been saved.
    pub fn survey_plan_or_default(&self) -> ConfigResult<SurveyPlan> {
        self.get_survey_plan()
            .unwrap_or_else(|| Ok(SurveyPlan::default()))
    }

    /// Save the survey plan.
    pub fn save_survey_plan(&self, plan: &SurveyPlan) -> ConfigResult<PathBuf> {
        self.save_json(SURVEY_PLAN_FILE, plan)
    }

    /// Delete the stored survey plan.
    pub fn delete_survey_plan(&self) -> ConfigResult<bool> {
        self.delete(SURVEY_PLAN_FILE)
    }
}
