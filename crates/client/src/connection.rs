//! Backend endpoint configuration and URL normalization.
//!
//! This module provides types and utilities for managing the WebSocket
//! endpoint of the inference backend:
//! - [`BackendAddress`]: Validated endpoint URL with source tracking
//! - [`AddressSource`]: Where the address configuration came from
//! - [`AddressError`]: User-friendly validation errors
//!
//! # Address Resolution Precedence
//!
//! Addresses are resolved in this order (highest priority first):
//! 1. Command line (`--url`)
//! 2. `JARVIS_HUD_URL` environment variable
//! 3. Configuration file
//! 4. Default: `ws://localhost:8765`
//!
//! # URL Normalization
//!
//! The [`normalize_url`] function handles common input formats:
//! - Bare host:port (e.g., `127.0.0.1:8765` → `ws://127.0.0.1:8765`)
//! - Missing port (e.g., `ws://localhost` → `ws://localhost:8765`)
//! - IPv6 addresses (e.g., `[::1]:8765` → `ws://[::1]:8765`)
//!
//! # Example
//!
//! ```
//! use hud_client::connection::{BackendAddress, AddressSource};
//!
//! let addr = BackendAddress::parse("127.0.0.1:8765", AddressSource::CommandLine)?;
//! assert_eq!(addr.as_str(), "ws://127.0.0.1:8765/");
//! assert!(!addr.is_tls());
//! # Ok::<(), hud_client::connection::AddressError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Environment variable that overrides the configured endpoint.
pub const ENV_BACKEND_URL: &str = "JARVIS_HUD_URL";

/// Default WebSocket port of the inference backend.
pub const DEFAULT_BACKEND_PORT: u16 = 8765;

/// Default backend endpoint when no configuration is provided.
pub const DEFAULT_BACKEND_URL: &str = "ws://localhost:8765";

/// Source of the backend address configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSource {
    /// Hardcoded default (`ws://localhost:8765`)
    Default,
    /// Loaded from the configuration file
    ConfigFile,
    /// Loaded from `JARVIS_HUD_URL` environment variable
    Environment,
    /// Passed on the command line
    CommandLine,
}

impl AddressSource {
    /// Returns a short label for log lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::ConfigFile => "config",
            Self::Environment => "env",
            Self::CommandLine => "cli",
        }
    }
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::ConfigFile => write!(f, "Configuration file"),
            Self::Environment => write!(f, "Environment ({ENV_BACKEND_URL})"),
            Self::CommandLine => write!(f, "Command line"),
        }
    }
}

/// Validated backend address with metadata.
///
/// Holds a normalized URL (scheme and port always present). Every reconnect
/// attempt targets this same endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendAddress {
    url: String,
    source: AddressSource,
    original: String,
}

impl BackendAddress {
    /// Parse and normalize a backend URL.
    ///
    /// ```
    /// use hud_client::connection::{BackendAddress, AddressSource};
    ///
    /// let addr = BackendAddress::parse("localhost:9000", AddressSource::ConfigFile)?;
    /// assert_eq!(addr.as_str(), "ws://localhost:9000/");
    /// # Ok::<(), hud_client::connection::AddressError>(())
    /// ```
    pub fn parse(input: &str, source: AddressSource) -> Result<Self, AddressError> {
        let normalized = normalize_url(input)?;
        Ok(Self {
            url: normalized.to_string(),
            source,
            original: input.to_string(),
        })
    }

    /// Returns the normalized URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Returns where this address came from.
    #[must_use]
    pub fn source(&self) -> AddressSource {
        self.source
    }

    /// Returns the original input string before normalization.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Returns `true` if this address uses TLS (`wss` scheme).
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.url.starts_with("wss://")
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl Default for BackendAddress {
    fn default() -> Self {
        Self {
            url: format!("{DEFAULT_BACKEND_URL}/"),
            source: AddressSource::Default,
            original: DEFAULT_BACKEND_URL.to_string(),
        }
    }
}

/// URL validation error with user-friendly messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was empty or whitespace-only
    EmptyInput,
    /// URL parsing failed
    InvalidUrl(String),
    /// No host was found in the URL
    MissingHost,
    /// Port could not be set
    InvalidPort(String),
    /// Unsupported URL scheme (only ws/wss allowed)
    UnsupportedScheme(String),
}

impl std::error::Error for AddressError {}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "Address cannot be empty"),
            Self::InvalidUrl(e) => write!(f, "Invalid URL: {e}"),
            Self::MissingHost => write!(f, "URL must include a host"),
            Self::InvalidPort(e) => write!(f, "Invalid port: {e}"),
            Self::UnsupportedScheme(s) => write!(f, "Unsupported scheme '{s}' (use ws or wss)"),
        }
    }
}

/// Normalize a backend URL string.
///
/// - Adds `ws://` scheme if missing
/// - Adds default port (8765) if missing
/// - Trims whitespace
///
/// ```
/// use hud_client::connection::normalize_url;
///
/// let url = normalize_url("192.168.1.100:8765")?;
/// assert_eq!(url.as_str(), "ws://192.168.1.100:8765/");
///
/// let url = normalize_url("[::1]:8080")?;
/// assert_eq!(url.as_str(), "ws://[::1]:8080/");
/// # Ok::<(), hud_client::connection::AddressError>(())
/// ```
pub fn normalize_url(input: &str) -> Result<Url, AddressError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(AddressError::EmptyInput);
    }

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("ws://{input}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| AddressError::InvalidUrl(e.to_string()))?;

    let scheme = url.scheme().to_lowercase();
    if scheme != "ws" && scheme != "wss" {
        return Err(AddressError::UnsupportedScheme(scheme));
    }

    if url.host().is_none() {
        return Err(AddressError::MissingHost);
    }

    if url.port().is_none() && !has_explicit_port(&with_scheme) {
        url.set_port(Some(DEFAULT_BACKEND_PORT))
            .map_err(|()| AddressError::InvalidPort("Cannot set port on this URL".to_string()))?;
    }

    Ok(url)
}

/// Whether the authority of `url` names a port.
///
/// `Url::port` hides a port equal to the scheme default (80 for `ws`, 443 for
/// `wss`), so the raw text is inspected instead.
fn has_explicit_port(url: &str) -> bool {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let after_host = match host_port.rfind(']') {
        Some(end) => &host_port[end + 1..],
        None => host_port,
    };
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

/// Resolve the backend address from multiple sources with precedence.
///
/// Invalid candidates are skipped with a warning; never fails, falls back to
/// the default.
pub fn resolve_address(cli: Option<&str>, config_file: Option<&str>) -> BackendAddress {
    let env = std::env::var(ENV_BACKEND_URL).ok();
    let candidates = [
        (cli, AddressSource::CommandLine),
        (env.as_deref(), AddressSource::Environment),
        (config_file, AddressSource::ConfigFile),
    ];

    for (input, source) in candidates {
        let Some(input) = input.filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        match BackendAddress::parse(input, source) {
            Ok(addr) => return addr,
            Err(e) => tracing::warn!("Ignoring {} backend address '{}': {}", source.label(), input, e),
        }
    }

    BackendAddress::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_normalize_bare_host_port() {
        let url = normalize_url("127.0.0.1:8765").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8765/");
    }

    #[test]
    fn test_normalize_with_wss_scheme() {
        let url = normalize_url("wss://secure.example.com:9443").unwrap();
        assert_eq!(url.as_str(), "wss://secure.example.com:9443/");

        // wss without port gets the backend default, not 443
        let url = normalize_url("wss://secure.example.com").unwrap();
        assert_eq!(url.as_str(), "wss://secure.example.com:8765/");
    }

    #[test]
    fn test_normalize_keeps_scheme_default_port() {
        let url = normalize_url("ws://example.com:80").unwrap();
        assert_eq!(url.port_or_known_default(), Some(80));

        let url = normalize_url("wss://example.com:443").unwrap();
        assert_eq!(url.port_or_known_default(), Some(443));

        let url = normalize_url("[::1]:80").unwrap();
        assert_eq!(url.port_or_known_default(), Some(80));

        let url = normalize_url("ws://user:pw@example.com/path").unwrap();
        assert_eq!(url.port(), Some(DEFAULT_BACKEND_PORT));
    }

    #[test]
    fn test_normalize_adds_default_port() {
        let url = normalize_url("ws://localhost").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8765/");
    }

    #[test]
    fn test_normalize_ipv6() {
        let url = normalize_url("[::1]:8080").unwrap();
        assert_eq!(url.as_str(), "ws://[::1]:8080/");
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        let url = normalize_url("  localhost:5000  ").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5000/");
    }

    #[test]
    fn test_normalize_empty_input() {
        assert_eq!(normalize_url("").unwrap_err(), AddressError::EmptyInput);
        assert_eq!(normalize_url("   ").unwrap_err(), AddressError::EmptyInput);
    }

    #[test]
    fn test_normalize_unsupported_scheme() {
        let err = normalize_url("http://example.com").unwrap_err();
        assert!(matches!(err, AddressError::UnsupportedScheme(s) if s == "http"));
    }

    #[test]
    fn test_backend_address_default_matches_parse() {
        let parsed = BackendAddress::parse(DEFAULT_BACKEND_URL, AddressSource::Default).unwrap();
        assert_eq!(BackendAddress::default(), parsed);
        assert_eq!(BackendAddress::default().as_str(), "ws://localhost:8765/");
    }

    #[test]
    fn test_backend_address_tls() {
        let addr = BackendAddress::parse("wss://hud.example.com", AddressSource::ConfigFile).unwrap();
        assert!(addr.is_tls());
        assert_eq!(addr.original(), "wss://hud.example.com");
    }

    #[test]
    #[serial]
    fn test_resolve_address_default() {
        std::env::remove_var(ENV_BACKEND_URL);
        let addr = resolve_address(None, None);
        assert_eq!(addr.source(), AddressSource::Default);
    }

    #[test]
    #[serial]
    fn test_resolve_address_env_beats_config() {
        std::env::set_var(ENV_BACKEND_URL, "ws://env.local:9999");
        let addr = resolve_address(None, Some("ws://config.local:7777"));
        assert_eq!(addr.as_str(), "ws://env.local:9999/");
        assert_eq!(addr.source(), AddressSource::Environment);
        std::env::remove_var(ENV_BACKEND_URL);
    }

    #[test]
    #[serial]
    fn test_resolve_address_cli_priority() {
        std::env::set_var(ENV_BACKEND_URL, "ws://env.local:8888");
        let addr = resolve_address(Some("cli.local:7777"), None);
        assert_eq!(addr.as_str(), "ws://cli.local:7777/");
        assert_eq!(addr.source(), AddressSource::CommandLine);
        std::env::remove_var(ENV_BACKEND_URL);
    }

    #[test]
    #[serial]
    fn test_resolve_address_skips_invalid() {
        std::env::remove_var(ENV_BACKEND_URL);
        let addr = resolve_address(Some("ftp://nope"), Some("config.local"));
        assert_eq!(addr.as_str(), "ws://config.local:8765/");
        assert_eq!(addr.source(), AddressSource::ConfigFile);
    }
}
