//! Application error type.
//!
//! `AppError` consolidates the failures the HUD binaries can hit:
//!
//! - **`Config`**: Figment could not parse or extract the configuration.
//! - **`Configuration`**: Semantic errors caught by
//!   [`HudConfig::validate`](crate::config::HudConfig::validate).
//! - **`Io`**: Standard I/O failures.
//! - **`Client`**: Errors at the `HudClient` handle boundary, typically a
//!   stopped event loop.
//! - **`Launch`**: Process supervisor failures.
//! - **`Logging`**: Tracing subscriber setup failures.
//!
//! Binaries wrap these in `anyhow::Result` at the top level.

use hud_client::ClientError;
use thiserror::Error;

use crate::launcher::LaunchError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Top-level error for the HUD binaries.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Logging error: {0}")]
    Logging(String),
}
