//! Layered configuration using Figment
//!
//! Configuration is loaded from, in increasing priority:
//! 1. Built-in defaults
//! 2. `config/hud.toml` (optional; path overridable with `--config`)
//! 3. Environment variables prefixed with `JARVIS_HUD_`, using `__` to
//!    separate nested keys
//!
//! # Example
//! ```no_run
//! use jarvis_hud::config::HudConfig;
//!
//! let config = HudConfig::load()?;
//! println!("Backend: {:?}", config.backend.url);
//! # Ok::<(), jarvis_hud::error::AppError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use hud_client::{resolve_address, BackendAddress, ClientConfig, LinkConfig, ReconnectPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::logging::OutputFormat;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/hud.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "JARVIS_HUD_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HudConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Backend endpoint settings
    pub backend: BackendConfig,
    /// Reconnect backoff
    pub reconnect: ReconnectConfig,
    /// Process supervisor settings
    pub launcher: LauncherConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Jarvis HUD".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

/// Backend endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// WebSocket URL. When unset the environment or the built-in default
    /// is used.
    pub url: Option<String>,
    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_ms: 5000,
        }
    }
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on any retry delay in milliseconds
    pub max_delay_ms: u64,
    /// Largest doubling exponent
    pub cap_shift: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 250,
            max_delay_ms: 5000,
            cap_shift: 5,
        }
    }
}

impl ReconnectConfig {
    /// Convert into the client's backoff policy.
    #[must_use]
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            cap_shift: self.cap_shift,
        }
    }
}

/// Process supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Python interpreter; searched for on PATH when unset
    pub python: Option<String>,
    /// Backend server script
    pub server_script: PathBuf,
    /// Working directory of the backend; defaults to the script's directory
    pub backend_dir: Option<PathBuf>,
    /// How long the backend must survive before it counts as started
    pub startup_grace_ms: u64,
    /// UI program; searched for beside the launcher and on PATH when unset
    pub ui_program: Option<PathBuf>,
    /// Arguments passed to the UI program
    pub ui_args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            python: None,
            server_script: PathBuf::from("backend/server.py"),
            backend_dir: None,
            startup_grace_ms: 500,
            ui_program: None,
            ui_args: vec!["run".to_string()],
        }
    }
}

impl HudConfig {
    /// Load configuration from `config/hud.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `JARVIS_HUD_`.
    /// Example: `JARVIS_HUD_RECONNECT__BASE_DELAY_MS=100`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file is not
    /// an error; the defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(AppError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if let Some(url) = &self.backend.url {
            if url.trim().is_empty() {
                return Err(AppError::Configuration(
                    "backend.url must not be empty".to_string(),
                ));
            }
        }

        if self.reconnect.base_delay_ms == 0 {
            return Err(AppError::Configuration(
                "reconnect.base_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(AppError::Configuration(format!(
                "reconnect.base_delay_ms ({}) exceeds reconnect.max_delay_ms ({})",
                self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
            )));
        }

        if self.launcher.startup_grace_ms == 0 {
            return Err(AppError::Configuration(
                "launcher.startup_grace_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the backend endpoint: `cli` flag, then `JARVIS_HUD_URL`, then
    /// this file's `backend.url`, then the default.
    #[must_use]
    pub fn endpoint(&self, cli: Option<&str>) -> BackendAddress {
        resolve_address(cli, self.backend.url.as_deref())
    }

    /// Build the client configuration for the resolved endpoint.
    #[must_use]
    pub fn client_config(&self, cli_url: Option<&str>) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint(cli_url),
            reconnect: self.reconnect.policy(),
            link: LinkConfig {
                connect_timeout: Duration::from_millis(self.backend.connect_timeout_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hud_client::{AddressSource, ENV_BACKEND_URL};
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let config = HudConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.application.name, "Jarvis HUD");
        assert_eq!(config.reconnect.base_delay_ms, 250);
        assert_eq!(config.reconnect.max_delay_ms, 5000);
        assert_eq!(config.reconnect.cap_shift, 5);
        assert_eq!(config.launcher.startup_grace_ms, 500);
        assert!(config.backend.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
[application]
log_level = "debug"
log_format = "json"

[backend]
url = "10.0.0.5:9000"

[reconnect]
base_delay_ms = 100
"#,
        );
        let config = HudConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert!(matches!(config.application.log_format, OutputFormat::Json));
        assert_eq!(config.backend.url.as_deref(), Some("10.0.0.5:9000"));
        assert_eq!(config.reconnect.base_delay_ms, 100);
        assert_eq!(config.reconnect.max_delay_ms, 5000);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[reconnect]\nbase_delay_ms = 100\n");
        std::env::set_var("JARVIS_HUD_RECONNECT__BASE_DELAY_MS", "40");
        let config = HudConfig::load_from(file.path());
        std::env::remove_var("JARVIS_HUD_RECONNECT__BASE_DELAY_MS");

        assert_eq!(config.unwrap().reconnect.base_delay_ms, 40);
    }

    #[test]
    fn test_validation_rules() {
        let mut config = HudConfig::default();
        assert!(config.validate().is_ok());

        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
        config.application.log_level = "INFO".to_string();
        assert!(config.validate().is_ok());

        config.backend.url = Some("  ".to_string());
        assert!(config.validate().is_err());
        config.backend.url = None;

        config.reconnect.base_delay_ms = 0;
        assert!(config.validate().is_err());
        config.reconnect.base_delay_ms = 6000;
        assert!(config.validate().is_err());
        config.reconnect.base_delay_ms = 250;

        config.launcher.startup_grace_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_conversion() {
        let policy = ReconnectConfig::default().policy();
        assert_eq!(policy, ReconnectPolicy::default());
    }

    #[test]
    #[serial]
    fn test_endpoint_precedence() {
        std::env::remove_var(ENV_BACKEND_URL);
        let mut config = HudConfig::default();
        assert_eq!(config.endpoint(None).source(), AddressSource::Default);

        config.backend.url = Some("ws://cfg-host:1000".to_string());
        let addr = config.endpoint(None);
        assert_eq!(addr.source(), AddressSource::ConfigFile);
        assert_eq!(addr.as_str(), "ws://cfg-host:1000/");

        std::env::set_var(ENV_BACKEND_URL, "env-host:2000");
        let from_env = config.endpoint(None);
        let from_cli = config.endpoint(Some("cli-host"));
        std::env::remove_var(ENV_BACKEND_URL);

        assert_eq!(from_env.source(), AddressSource::Environment);
        assert_eq!(from_env.as_str(), "ws://env-host:2000/");
        assert_eq!(from_cli.source(), AddressSource::CommandLine);
        assert_eq!(from_cli.as_str(), "ws://cli-host:8765/");
    }
}
