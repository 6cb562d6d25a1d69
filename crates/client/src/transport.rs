//! WebSocket link to the backend.
//!
//! A [`Link`] is one connection attempt plus, if the handshake succeeds, the
//! lifetime of that connection. It runs in its own task and reports back
//! through an event channel; every event is tagged with the link's
//! generation so the owner can drop events from links it has replaced.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::connection::BackendAddress;
use crate::error::ClientError;

/// Transport notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake completed.
    Connected,
    /// One inbound text frame.
    Message(String),
    /// Socket-level failure.
    Error(String),
    /// Handshake failed or the connection closed. Always the last event.
    Disconnected,
}

/// A [`LinkEvent`] tagged with the generation of the link that produced it.
pub type TaggedEvent = (u64, LinkEvent);

/// Transport tuning.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// How long a handshake may take before it counts as failed.
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to a running link task. Dropping it aborts the task; use
/// [`close`](Link::close) to send a Close frame first.
#[derive(Debug)]
pub struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl Link {
    /// Spawn a link task that connects to `address`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        address: &BackendAddress,
        generation: u64,
        config: LinkConfig,
        events: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(
            address.as_str().to_string(),
            generation,
            config,
            events,
            outbound_rx,
        ));
        Self {
            generation,
            outbound,
            task,
        }
    }

    /// Generation tag of this link.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue one text frame. Fire-and-forget: failures after queueing are
    /// reported as [`LinkEvent::Error`].
    pub fn send(&self, text: String) -> Result<(), ClientError> {
        self.outbound
            .send(text)
            .map_err(|_| ClientError::Transport("link is closed".to_string()))
    }

    /// Ask the task to send a Close frame and wait up to `grace` for it to
    /// finish. The task is aborted if it does not.
    pub async fn close(mut self, grace: Duration) {
        let (closed, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.outbound, closed));
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            tracing::debug!(generation = self.generation, "Link did not close in time");
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_link(
    url: String,
    generation: u64,
    config: LinkConfig,
    events: mpsc::UnboundedSender<TaggedEvent>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let emit = |event: LinkEvent| {
        let _ = events.send((generation, event));
    };

    let ws = match tokio::time::timeout(config.connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            tracing::debug!(%url, generation, error = %e, "Handshake failed");
            emit(LinkEvent::Error(e.to_string()));
            emit(LinkEvent::Disconnected);
            return;
        }
        Err(_) => {
            emit(LinkEvent::Error(format!(
                "Connection timed out after {}ms",
                config.connect_timeout.as_millis()
            )));
            emit(LinkEvent::Disconnected);
            return;
        }
    };

    emit(LinkEvent::Connected);
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        emit(LinkEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => emit(LinkEvent::Message(text)),
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::debug!(generation, ?frame, "Backend closed the connection");
                    break;
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    tracing::debug!(generation, bytes = data.len(), "Ignoring binary frame");
                }
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(LinkEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    emit(LinkEvent::Disconnected);
}
