//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Thin wrapper around [`fitness_session_core::Config`]: the session's own
//! configuration already covers everything consumed at `startSession`, so
//! this layer only adds the handful of deployment knobs (output directory,
//! tick interval) worth overriding from the environment without editing the
//! YAML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fitness_session_core::Config as CoreConfig;

/// Server configuration: the session's [`CoreConfig`] plus environment
/// overrides applied on load.
#[derive(Debug)]
pub struct ServerConfig {
    pub core: CoreConfig,
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut core: CoreConfig = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            CoreConfig::default()
        };

        Self::apply_env_overrides(&mut core);
        Ok(Self { core })
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(core: &mut CoreConfig) {
        if let Ok(val) = std::env::var("FITNESS_OUTPUT_DIR") {
            core.persistence.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("FITNESS_PERSIST_INTERVAL_SECONDS") {
            if let Ok(secs) = val.parse() {
                core.persistence.interval_seconds = secs;
            }
        }

        if let Ok(val) = std::env::var("FITNESS_TICK_INTERVAL_SECONDS") {
            if let Ok(secs) = val.parse() {
                core.timeline.interval_seconds = secs;
            }
        }

        // Note: FITNESS_DATA_DIR (equivalent name) is handled by clap via
        // #[arg(env = ...)] in main.rs, same split as FITNESS_OUTPUT_DIR here.
    }
}
