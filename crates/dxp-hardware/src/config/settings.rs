//! Library settings.
//!
//! Settings cover the knobs around the legacy text formats: where to look
//! for files, how many modules to accept, and the timing of the DSP
//! download handshake. Values are layered with figment:
//!
//! 1. built-in defaults
//! 2. a TOML file (explicit path, else `<config dir>/xerxes/settings.toml`
//!    when it exists)
//! 3. `XERXES_*` environment variables (`XERXES_MAX_MODULES=16`)
//!
//! # Usage
//!
//! ```rust,ignore
//! use dxp_hardware::config::settings::load_settings;
//!
//! let settings = load_settings(Some(Path::new("xerxes.toml")))?;
//! println!("accepting up to {} modules", settings.max_modules);
//! ```

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Error types for settings loading.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Explicitly requested file does not exist
    #[error("Settings file not found: {0}")]
    NotFound(String),

    /// Values parsed but are unusable
    #[error("Settings validation failed: {0}")]
    ValidationError(String),
}

/// Ambient configuration of a [`System`](crate::System).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XerxesSettings {
    /// Environment variables naming directories searched for config and
    /// firmware files, in order.
    pub home_vars: Vec<String>,
    /// Extra directories searched after the `home_vars` directories.
    pub search_paths: Vec<PathBuf>,
    /// Maximum number of modules in one system.
    pub max_modules: usize,
    /// Pause between DSP download and the first ready poll.
    pub dsp_settle_ms: u64,
    /// Upper bound on waiting for a DSP to report ready.
    pub dsp_ready_timeout_ms: u64,
    /// ADC rule passed to the analog signal conditioner setup.
    pub adc_rule: f32,
}

impl Default for XerxesSettings {
    fn default() -> Self {
        Self {
            home_vars: vec!["XIAHOME".to_string(), "DXPHOME".to_string()],
            search_paths: Vec::new(),
            max_modules: 100,
            dsp_settle_ms: 1000,
            dsp_ready_timeout_ms: 10_000,
            adc_rule: 0.05,
        }
    }
}

impl XerxesSettings {
    /// Wait after a DSP download before polling for readiness.
    pub fn dsp_settle(&self) -> Duration {
        Duration::from_millis(self.dsp_settle_ms)
    }

    /// Limit on the readiness poll.
    pub fn dsp_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.dsp_ready_timeout_ms)
    }

    /// Extract and validate settings from a prepared figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let settings: XerxesSettings = figment.extract().context("Failed to parse settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the library cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_modules == 0 {
            return Err(SettingsError::ValidationError(
                "max_modules must be at least 1".to_string(),
            ));
        }
        if self.dsp_ready_timeout_ms == 0 {
            return Err(SettingsError::ValidationError(
                "dsp_ready_timeout_ms must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.adc_rule) {
            return Err(SettingsError::ValidationError(format!(
                "adc_rule {} outside [0, 1)",
                self.adc_rule
            )));
        }
        Ok(())
    }
}

/// `<config dir>/xerxes/settings.toml`, if a config directory exists.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("xerxes").join("settings.toml"))
}

/// Layer defaults, a TOML file and `XERXES_*` environment variables.
///
/// An explicit `path` must exist; the default location is optional.
pub fn load_settings(path: Option<&Path>) -> Result<XerxesSettings> {
    let mut figment = Figment::from(Serialized::defaults(XerxesSettings::default()));

    match path {
        Some(path) => {
            if !path.exists() {
                return Err(SettingsError::NotFound(path.display().to_string()).into());
            }
            debug!(path = %path.display(), "Loading settings");
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(default) = default_settings_path().filter(|p| p.exists()) {
                debug!(path = %default.display(), "Loading default settings");
                figment = figment.merge(Toml::file(default));
            }
        }
    }

    let settings = XerxesSettings::from_figment(figment.merge(Env::prefixed("XERXES_")))
        .with_context(|| match path {
            Some(path) => format!("Invalid settings in {}", path.display()),
            None => "Invalid settings".to_string(),
        })?;

    info!(
        max_modules = settings.max_modules,
        dsp_ready_timeout_ms = settings.dsp_ready_timeout_ms,
        "Settings loaded"
    );
    Ok(settings)
}
