//! Single-task event loop that owns the client state machine.
//!
//! # Architecture
//!
//! The [`ClientActor`] is the single owner of the [`ClientStateMachine`], the
//! live [`Link`] and the reconnect timer. It runs in a dedicated Tokio task
//! and processes three event sources sequentially, so no locking is needed:
//!
//! ```text
//! HudClient (UI) ──HudCommand──┐
//! Link task ─────LinkEvent─────┼──> ClientActor ──┬──> watch: latest HudView
//! Reconnect timer ─────────────┘                  └──> broadcast: HudUpdate
//! ```
//!
//! Link events carry a generation tag; events from a link the actor has
//! already replaced are dropped.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, warn, Instrument};

use crate::codec::StepRequest;
use crate::connection::BackendAddress;
use crate::error::{ClientError, Result};
use crate::machine::{ClientStateMachine, Effect, HudView, Output};
use crate::reconnect::ReconnectPolicy;
use crate::telemetry::ChangeSet;
use crate::transport::{Link, LinkConfig, LinkEvent, TaggedEvent};

/// Everything needed to start a client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Backend endpoint; every attempt targets this address.
    pub endpoint: BackendAddress,
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Transport tuning.
    pub link: LinkConfig,
}

/// Commands accepted by the actor.
#[derive(Debug, Clone)]
pub enum HudCommand {
    /// Issue a generation step.
    Step(StepRequest),
    /// Empty the diagnostics log.
    ClearLog,
    /// Stop the event loop and close the link.
    Shutdown,
}

/// Notification published after every event that changed something.
#[derive(Debug, Clone)]
pub struct HudUpdate {
    /// Which properties changed.
    pub changes: ChangeSet,
    /// Full state after the change.
    pub view: Arc<HudView>,
}

const COMMAND_CAPACITY: usize = 32;
const UPDATE_CAPACITY: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Cloneable handle used by UI code.
///
/// Reading is done through [`snapshot`](Self::snapshot),
/// [`subscribe`](Self::subscribe) or [`wait_until`](Self::wait_until); the
/// only mutating operations are [`step`](Self::step),
/// [`clear_log`](Self::clear_log) and [`shutdown`](Self::shutdown).
#[derive(Debug, Clone)]
pub struct HudClient {
    commands: mpsc::Sender<HudCommand>,
    snapshot: watch::Receiver<Arc<HudView>>,
    updates: broadcast::Sender<HudUpdate>,
}

impl HudClient {
    /// Spawn the actor on the current Tokio runtime and start connecting.
    pub fn spawn(config: ClientConfig) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let machine = ClientStateMachine::new(config.endpoint.clone(), config.reconnect);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(machine.view().clone()));
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let span = tracing::info_span!("hud_client", url = %config.endpoint);
        let actor = ClientActor {
            machine,
            link_config: config.link,
            link: None,
            generation: 0,
            events_tx,
            events_rx,
            reconnect_timer: None,
            snapshot_tx,
            updates: updates.clone(),
        };
        let handle = tokio::spawn(actor.run(cmd_rx).instrument(span));

        (
            Self {
                commands: cmd_tx,
                snapshot: snapshot_rx,
                updates,
            },
            handle,
        )
    }

    /// Request one generation step. Rejected by the state machine (not
    /// here) when disconnected.
    pub async fn step(&self, request: StepRequest) -> Result<()> {
        self.send(HudCommand::Step(request)).await
    }

    /// Non-async variant of [`step`](Self::step) for synchronous UI code.
    ///
    /// Fails with [`ClientError::QueueFull`] when the command queue is full;
    /// the request can be retried.
    pub fn try_step(&self, request: StepRequest) -> Result<()> {
        self.commands
            .try_send(HudCommand::Step(request))
            .map_err(|e| match e {
                TrySendError::Full(_) => ClientError::QueueFull,
                TrySendError::Closed(_) => ClientError::ChannelClosed,
            })
    }

    /// Empty the diagnostics log.
    pub async fn clear_log(&self) -> Result<()> {
        self.send(HudCommand::ClearLog).await
    }

    /// Stop the actor. The link is closed and no reconnect is attempted.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(HudCommand::Shutdown).await
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<HudView> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Receive every future [`HudUpdate`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HudUpdate> {
        self.updates.subscribe()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&HudView) -> bool,
    ) -> Result<Arc<HudView>> {
        let mut rx = self.snapshot.clone();
        let view = rx
            .wait_for(|view| predicate(view.as_ref()))
            .await
            .map_err(|_| ClientError::ChannelClosed)?;
        Ok(Arc::clone(&view))
    }

    async fn send(&self, command: HudCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }
}

/// Owner of the state machine, the link and the reconnect timer.
pub struct ClientActor {
    machine: ClientStateMachine,
    link_config: LinkConfig,
    link: Option<Link>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    snapshot_tx: watch::Sender<Arc<HudView>>,
    updates: broadcast::Sender<HudUpdate>,
}

impl ClientActor {
    async fn run(mut self, mut commands: mpsc::Receiver<HudCommand>) {
        let out = self.machine.connect();
        self.apply(out);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(HudCommand::Step(request)) => {
                        let out = self.machine.step(&request, Instant::now());
                        self.apply(out);
                    }
                    Some(HudCommand::ClearLog) => {
                        let out = self.machine.clear_log();
                        self.apply(out);
                    }
                    Some(HudCommand::Shutdown) | None => break,
                },
                Some((generation, event)) = self.events_rx.recv() => {
                    self.on_link_event(generation, event);
                }
                () = reconnect_due(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    let out = self.machine.reconnect_timer_fired();
                    self.apply(out);
                }
            }
        }

        if let Some(link) = self.link.take() {
            link.close(CLOSE_GRACE).await;
        }
        info!("Client event loop stopped");
    }

    fn on_link_event(&mut self, generation: u64, event: LinkEvent) {
        if generation != self.generation {
            debug!(generation, current = self.generation, ?event, "Dropping stale link event");
            return;
        }

        let out = match event {
            LinkEvent::Connected => self.machine.on_connected(),
            LinkEvent::Message(text) => self.machine.on_message(&text, Instant::now()),
            LinkEvent::Error(error) => self.machine.on_transport_error(&error),
            LinkEvent::Disconnected => {
                self.link = None;
                self.machine.on_disconnected()
            }
        };
        self.apply(out);
    }

    fn apply(&mut self, out: Output) {
        for effect in out.effects {
            match effect {
                Effect::Open(address) => {
                    self.generation += 1;
                    self.link = Some(Link::open(
                        &address,
                        self.generation,
                        self.link_config,
                        self.events_tx.clone(),
                    ));
                }
                Effect::Send(payload) => match &self.link {
                    Some(link) => {
                        if let Err(e) = link.send(payload) {
                            warn!(generation = link.generation(), error = %e, "Send failed");
                        }
                    }
                    None => warn!("Send requested without a link"),
                },
                Effect::ArmReconnect(delay) => {
                    self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
                }
            }
        }

        if out.changes.is_empty() {
            return;
        }
        let view = Arc::new(self.machine.view().clone());
        self.snapshot_tx.send_replace(Arc::clone(&view));
        // No subscribers is fine.
        let _ = self.updates.send(HudUpdate {
            changes: out.changes,
            view,
        });
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
