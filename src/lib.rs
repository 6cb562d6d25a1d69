//! # Jarvis HUD
//!
//! Application crate for the live inference telemetry HUD. The streaming
//! client itself lives in `hud_client`; this crate adds what the binaries
//! need around it.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered Figment configuration (`config/hud.toml` plus
//!   `JARVIS_HUD_` environment overrides) and validation.
//! - **`error`**: The `AppError` enum for the binaries.
//! - **`launcher`**: Process supervisor that runs the Python backend and the
//!   UI with a joint lifetime.
//! - **`logging`**: Tracing subscriber initialisation.
//! - **`render`**: Plain-text rendering of client updates for the headless
//!   HUD.

pub mod config;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod render;

pub use hud_client;
