// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::drivers::acquisition::millis;
use crate::drivers::{AcquisitionSettings, SealTest, WorkingModality};
use crate::types::ConnectionMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid session config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything needed to run one recording, loaded from JSON.
/// Missing fields fall back to the defaults below.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: ConnectionMode,
    /// Vendor C library (hardware mode only).
    pub library_path: PathBuf,
    pub output: PathBuf,
    pub modality: WorkingModality,
    pub acquisition: AcquisitionSettings,
    #[serde(with = "millis")]
    pub compensation_time: Duration,
    /// Applied after compensation when present.
    pub seal_test: Option<SealTest>,
    /// Wait between configuration and the initial purge.
    #[serde(with = "millis")]
    pub settle_delay: Duration,
    pub disconnect_attempts: u32,
    #[serde(with = "millis")]
    pub disconnect_retry_delay: Duration,
    pub simulation_buffer_seconds: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Hardware,
            library_path: PathBuf::from(crate::edl::DEFAULT_LIBRARY),
            output: PathBuf::from("edl_data.dat"),
            modality: WorkingModality::default(),
            acquisition: AcquisitionSettings::default(),
            compensation_time: Duration::from_millis(5_000),
            seal_test: None,
            settle_delay: Duration::from_millis(500),
            disconnect_attempts: 1_000,
            disconnect_retry_delay: Duration::from_millis(1),
            simulation_buffer_seconds: 1.0,
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CurrentRange, SamplingRate};

    #[test]
    fn empty_object_yields_defaults() {
        let config: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.acquisition.min_packets_to_read, 10);
        assert_eq!(config.acquisition.iterations, 1_000);
        assert_eq!(config.disconnect_attempts, 1_000);
    }
    #[test]
    fn partial_file_overrides_selected_fields() {
        let json = r#"{
            "mode": "simulation",
            "modality": { "sampling_rate": "20khz", "range": "20na" },
            "acquisition": { "min_packets_to_read": 64, "idle_sleep": 2 },
            "seal_test": { "vstep_mv": 10.0 }
        }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mode, ConnectionMode::Simulation);
        assert_eq!(config.modality.sampling_rate, SamplingRate::Khz20);
        assert_eq!(config.modality.range, CurrentRange::Na20);
        assert_eq!(config.acquisition.min_packets_to_read, 64);
        assert_eq!(config.acquisition.iterations, 1_000);
        assert_eq!(config.acquisition.idle_sleep, Duration::from_millis(2));
        let seal = config.seal_test.unwrap();
        assert_eq!(seal.vstep_mv, 10.0);
        assert_eq!(seal.tpe_ms, 50.0);
    }
    #[test]
    fn saved_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut config = SessionConfig::default();
        config.seal_test = Some(SealTest::default());
        config.compensation_time = Duration::from_millis(250);
        config.save(&path).unwrap();
        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }
    #[test]
    fn unknown_selector_is_rejected() {
        let err = serde_json::from_str::<SessionConfig>(r#"{"modality":{"sampling_rate":"3khz"}}"#);
        assert!(err.is_err());
        let missing = SessionConfig::load(Path::new("/nonexistent/session.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
