//! Websocket streaming of exploration events.
//!
//! A client opens a connection, sends one JSON [`NegotiationRequest`], and
//! receives every [`ExplorationEvent`] of the resulting search as text
//! frames, in emission order. Ready events may be batched into one frame
//! (a JSON array) but are never reordered. The stream ends with a
//! `complete` event carrying the recommendation, or an `error` event.
//!
//! The client can abort the running search at any time with
//! `{"command": "cancel"}`; closing the connection cancels it too.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::mcts::{CancelFlag, EventSink, ExplorationEvent};
use crate::services::{NegotiationRequest, NegotiationService};

/// Configuration for the websocket server.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub port: u16,
    pub host: String,

    /// Maximum number of ready events packed into one frame.
    pub batch_limit: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            host: "0.0.0.0".to_string(),
            batch_limit: 16,
        }
    }
}

/// Websocket server streaming search progress to clients.
pub struct WebSocketServer {
    config: WebSocketConfig,
    service: Arc<NegotiationService>,
}

impl WebSocketServer {
    pub fn new(config: WebSocketConfig, service: Arc<NegotiationService>) -> Self {
        Self { config, service }
    }

    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        log::info!("websocket server listening on ws://{addr}");
        Self::serve(listener, Arc::clone(&self.service), self.config.batch_limit).await
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(
        listener: TcpListener,
        service: Arc<NegotiationService>,
        batch_limit: usize,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, peer) = listener.accept().await?;
            log::info!("websocket client connected: {peer}");
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                handle_connection(stream, service, batch_limit).await;
                log::info!("websocket client done: {peer}");
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    service: Arc<NegotiationService>,
    batch_limit: usize,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::error!("websocket handshake failed: {e}");
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    // The first text frame must carry the search request.
    let request = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<NegotiationRequest>(text.as_str()) {
                    Ok(request) => break request,
                    Err(e) => {
                        log::warn!("rejecting malformed search request: {e}");
                        send_event(
                            &mut write,
                            &ExplorationEvent::error(&format!("malformed request: {e}")),
                        )
                        .await;
                        return;
                    }
                }
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(_)) | Some(Err(_)) | None => return,
        }
    };

    let search_id = Uuid::new_v4();
    log::info!("search {search_id}: goal={:?}", request.goal);

    let cancel = CancelFlag::new();
    let mut sink = EventSink::disabled();
    let mut events = sink.attach(service.search_config().event_buffer);

    let search_cancel = cancel.clone();
    let search = tokio::spawn(async move {
        // The sink moves into the task; once the search returns, every
        // sender is dropped and the event stream below terminates.
        service.run_search(&request, sink, search_cancel).await
    });

    let mut client_gone = false;
    loop {
        tokio::select! {
            maybe_event = events.recv() => match maybe_event {
                Some(event) => {
                    let mut batch = vec![event];
                    while batch.len() < batch_limit {
                        match events.try_recv() {
                            Ok(next) => batch.push(next),
                            Err(_) => break,
                        }
                    }
                    if !client_gone && !send_batch(&mut write, &batch).await {
                        // No reader left; let the search finish quietly.
                        client_gone = true;
                        cancel.cancel();
                    }
                }
                None => break,
            },
            incoming = read.next(), if !client_gone => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if is_cancel_command(text.as_str()) {
                        log::info!("search {search_id}: cancel requested by client");
                        cancel.cancel();
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    client_gone = true;
                    cancel.cancel();
                }
                Some(Err(e)) => {
                    log::warn!("search {search_id}: client read error: {e}");
                    client_gone = true;
                    cancel.cancel();
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let terminal = match search.await {
        Ok(Ok(outcome)) => ExplorationEvent::complete(
            json!({
                "search_id": search_id.to_string(),
                "best_action": outcome.best_reply,
                "alternatives": outcome.alternatives,
                "state_evaluation": outcome.state_evaluation,
                "iterations_run": outcome.iterations_run,
                "cancelled": outcome.cancelled,
            }),
            outcome.total_nodes,
            outcome.max_depth,
        ),
        Ok(Err(e)) => {
            log::error!("search {search_id} failed: {e}");
            ExplorationEvent::error(&e.to_string())
        }
        Err(e) => {
            log::error!("search {search_id} panicked: {e}");
            ExplorationEvent::error("internal search failure")
        }
    };

    if !client_gone {
        send_event(&mut write, &terminal).await;
        let _ = write.send(Message::Close(None)).await;
    }
}

/// Sends one frame holding either a single event or a JSON array of them.
/// Returns false when the connection is no longer writable.
async fn send_batch<W>(write: &mut W, batch: &[ExplorationEvent]) -> bool
where
    W: SinkExt<Message> + Unpin,
{
    let payload = if batch.len() == 1 {
        serde_json::to_string(&batch[0])
    } else {
        serde_json::to_string(batch)
    };
    match payload {
        Ok(text) => write.send(Message::text(text)).await.is_ok(),
        Err(e) => {
            log::error!("failed to serialize event batch: {e}");
            true
        }
    }
}

async fn send_event<W>(write: &mut W, event: &ExplorationEvent) -> bool
where
    W: SinkExt<Message> + Unpin,
{
    send_batch(write, std::slice::from_ref(event)).await
}

/// Recognizes the client-side cancel command.
fn is_cancel_command(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| {
            value
                .get("command")
                .and_then(|c| c.as_str())
                .map(|c| c == "cancel")
        })
        .unwrap_or(false)
}
