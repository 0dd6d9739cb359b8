//! Configuration management for tethercam
//!
//! Sync timing, workspace defaults and per-model candidate key overrides. Stored as TOML;
//! `load_layered` additionally applies `TETHERCAM_*` environment overrides.

use crate::errors::TetherError;
use crate::types::{CandidateTable, SemanticParam};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    /// Semantic parameter name -> ordered vendor keys, replacing the built-in list
    pub candidates: BTreeMap<String, Vec<String>>,
}

/// Polling and write settle timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the background parameter read
    pub poll_interval_ms: u64,
    /// Wait after a successful write before re-reading
    pub settle_delay_ms: u64,
    /// Buffered session events per subscriber
    pub event_capacity: usize,
    /// Buffered requests into the session task
    pub command_capacity: usize,
}

/// Capture destination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root under which fresh workspaces are created; none disables workspace creation
    pub workspace_root: Option<String>,
    /// Create one dated sub-folder per capture session
    pub dated_workspaces: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            settle_delay_ms: 500,
            event_capacity: 64,
            command_capacity: 32,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            dated_workspaces: true,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl TetherConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, TetherError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| TetherError::Config(format!("Failed to read config file: {}", e)))?;

        let config: TetherConfig = toml::from_str(&contents)
            .map_err(|e| TetherError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load the TOML file (if present) and apply `TETHERCAM_*` environment overrides,
    /// e.g. `TETHERCAM_SYNC__POLL_INTERVAL_MS=250`.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, TetherError> {
        let path = path.as_ref();
        let layered = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("TETHERCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| TetherError::Config(format!("Failed to load configuration: {}", e)))?;

        let config: TetherConfig = layered
            .try_deserialize()
            .map_err(|e| TetherError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), TetherError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TetherError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| TetherError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| TetherError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("tethercam.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Built-in candidates with this configuration's overrides applied
    pub fn candidate_table(&self) -> Result<CandidateTable, TetherError> {
        let mut table = CandidateTable::default();
        for (name, keys) in &self.candidates {
            let param: SemanticParam = name
                .parse()
                .map_err(|_| TetherError::Config(format!("Unknown parameter in candidates: {name}")))?;
            table.set_candidates(param, keys.clone());
        }
        Ok(table)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), TetherError> {
        if self.sync.poll_interval_ms == 0 {
            return Err(TetherError::Config("Poll interval must be positive".to_string()));
        }
        if self.sync.settle_delay_ms == 0 {
            return Err(TetherError::Config("Settle delay must be positive".to_string()));
        }
        if self.sync.event_capacity == 0 || self.sync.command_capacity == 0 {
            return Err(TetherError::Config("Channel capacities must be positive".to_string()));
        }
        for (name, keys) in &self.candidates {
            if keys.is_empty() || keys.iter().any(|k| k.trim().is_empty()) {
                return Err(TetherError::Config(format!(
                    "Candidate list for {name} must contain non-empty keys"
                )));
            }
        }
        self.candidate_table().map(|_| ())
    }
}
