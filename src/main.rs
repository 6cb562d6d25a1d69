//! CLI entry point for jarvis-hud
//!
//! Provides command-line interface for:
//! - Running the headless HUD against a telemetry backend
//! - Launching the backend and the HUD together
//!
//! # Usage
//!
//! Watch a backend and generate until the model says it is done:
//! ```bash
//! jarvis-hud run --prompt "Once upon a time"
//! ```
//!
//! Start backend and UI together:
//! ```bash
//! jarvis-hud launch
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use hud_client::{Change, ChangeSet, HudClient, HudUpdate, HudView, StepRequest};
use jarvis_hud::config::{HudConfig, DEFAULT_CONFIG_PATH};
use jarvis_hud::launcher::{LaunchOutcome, Supervisor};
use jarvis_hud::logging;
use jarvis_hud::render::render_update;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "jarvis-hud", version)]
#[command(about = "Live inference telemetry HUD", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the backend and print telemetry as it arrives
    Run(RunArgs),

    /// Start the backend, run the UI, and stop the backend when the UI exits
    Launch,
}

#[derive(Args)]
struct RunArgs {
    /// Backend URL (overrides JARVIS_HUD_URL and the config file)
    #[arg(long)]
    url: Option<String>,

    /// Prompt for the first step; resets generation on the backend
    #[arg(long)]
    prompt: Option<String>,

    /// Stop after this many steps
    #[arg(long)]
    steps: Option<u32>,

    /// Sampling temperature
    #[arg(long, default_value_t = 1.0)]
    temperature: f64,

    /// Top-k cutoff (0 disables)
    #[arg(long, default_value_t = 0)]
    top_k: i64,

    /// Nucleus sampling threshold
    #[arg(long, default_value_t = 1.0)]
    top_p: f64,

    /// Layer to visualise
    #[arg(long, default_value_t = 0)]
    layer: i64,

    /// Attention head to visualise
    #[arg(long, default_value_t = 0)]
    head: i64,

    /// Also print diagnostics log lines
    #[arg(long)]
    show_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HudConfig::load_from(&cli.config)?;
    config.validate()?;
    logging::init_from_config(&config)?;
    tracing::debug!(config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Commands::Run(args) => run_hud(&config, args).await,
        Commands::Launch => tokio::task::spawn_blocking(move || launch(config)).await?,
    }
}

/// Decides when the headless HUD issues the next step.
struct Stepper {
    request: StepRequest,
    limit: Option<u32>,
    sent: u32,
    awaiting: bool,
}

impl Stepper {
    fn new(args: &RunArgs) -> Option<Self> {
        if args.prompt.is_none() && args.steps.is_none() {
            return None;
        }
        Some(Self {
            request: StepRequest::new(
                args.prompt.clone().unwrap_or_default(),
                args.temperature,
                args.top_k,
                args.top_p,
                args.layer,
                args.head,
            ),
            limit: args.steps,
            sent: 0,
            awaiting: false,
        })
    }

    fn finished(&self, update: &HudUpdate) -> bool {
        if self.awaiting || self.sent == 0 {
            return false;
        }
        update.view.done() || self.limit.is_some_and(|limit| self.sent >= limit)
    }

    /// Re-derive the pending flag from a full snapshot after updates were
    /// skipped.
    fn resync(&mut self, view: &HudView) {
        if self.awaiting && !view.busy {
            self.awaiting = false;
        }
    }

    /// Next request to send, if one is due.
    fn next(&mut self, update: &HudUpdate) -> Option<StepRequest> {
        let answered = update.changes.contains(Change::Busy) && !update.view.busy;
        let reconnected = update.changes.contains(Change::Connection) && update.view.connected();
        if answered || reconnected {
            self.awaiting = false;
        }
        if self.awaiting || !update.view.connected() || self.finished(update) {
            return None;
        }
        let request = if self.sent == 0 {
            self.request.clone()
        } else {
            self.request.continuation()
        };
        self.sent += 1;
        self.awaiting = true;
        Some(request)
    }
}

async fn run_hud(config: &HudConfig, args: RunArgs) -> Result<()> {
    let client_config = config.client_config(args.url.as_deref());
    let endpoint = &client_config.endpoint;
    tracing::info!(
        url = %endpoint,
        source = %endpoint.source(),
        original = endpoint.original(),
        tls = endpoint.is_tls(),
        "Resolved backend endpoint"
    );
    println!("{} -> {}", config.application.name, endpoint);

    let (client, handle) = HudClient::spawn(client_config);
    let mut updates = client.subscribe();
    let mut stepper = Stepper::new(&args);

    loop {
        let update = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = updates.recv() => match received {
                Ok(update) => update,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Renderer fell behind");
                    let view = client.snapshot();
                    if let Some(stepper) = stepper.as_mut() {
                        stepper.resync(&view);
                    }
                    HudUpdate {
                        changes: ChangeSet::new(),
                        view,
                    }
                }
                Err(RecvError::Closed) => break,
            },
        };

        for line in render_update(&update, args.show_log) {
            println!("{line}");
        }

        let Some(stepper) = stepper.as_mut() else {
            continue;
        };
        if let Some(request) = stepper.next(&update) {
            client.step(request).await?;
        } else if stepper.finished(&update) {
            println!("finished after {} step(s)", stepper.sent);
            break;
        }
    }

    client.shutdown().await?;
    handle.await?;
    Ok(())
}

fn launch(config: HudConfig) -> Result<()> {
    match Supervisor::new(config.launcher.clone()).run() {
        Ok(LaunchOutcome::UiExited(status)) => {
            if !status.success() {
                tracing::warn!(%status, "UI exited with an error");
            }
            Ok(())
        }
        Ok(LaunchOutcome::BackendOnly) => {
            eprintln!(
                "Backend started ({}), but the UI program was not found.",
                config.endpoint(None)
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Launch failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hud_client::ConnectionState;

    fn run_args(steps: u32) -> RunArgs {
        RunArgs {
            url: None,
            prompt: Some("Hello".to_string()),
            steps: Some(steps),
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            layer: 0,
            head: 0,
            show_log: false,
        }
    }

    fn update(changes: &[Change], busy: bool) -> HudUpdate {
        let view = HudView {
            connection: ConnectionState::Connected,
            busy,
            ..HudView::default()
        };
        HudUpdate {
            changes: changes.iter().copied().collect(),
            view: Arc::new(view),
        }
    }

    #[test]
    fn test_stepper_waits_for_answer() {
        let mut stepper = Stepper::new(&run_args(3)).unwrap();

        let first = stepper.next(&update(&[Change::Connection], false)).unwrap();
        assert_eq!(first.prompt, "Hello");
        assert!(stepper.next(&update(&[Change::Busy], true)).is_none());

        let second = stepper.next(&update(&[Change::Busy], false)).unwrap();
        assert!(second.prompt.is_empty());
        assert_eq!(stepper.sent, 2);
    }

    #[test]
    fn test_stepper_resumes_after_lag() {
        let mut stepper = Stepper::new(&run_args(3)).unwrap();
        stepper.next(&update(&[Change::Connection], false)).unwrap();

        // The busy-cleared update was among the skipped ones.
        let snapshot = update(&[], false);
        stepper.resync(&snapshot.view);
        assert!(stepper.next(&snapshot).is_some());
        assert_eq!(stepper.sent, 2);
    }

    #[test]
    fn test_stepper_keeps_waiting_while_busy() {
        let mut stepper = Stepper::new(&run_args(3)).unwrap();
        stepper.next(&update(&[Change::Connection], false)).unwrap();

        let snapshot = update(&[], true);
        stepper.resync(&snapshot.view);
        assert!(stepper.next(&snapshot).is_none());
        assert_eq!(stepper.sent, 1);
    }
}
