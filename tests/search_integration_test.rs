//! End-to-end tests: stub-oracle searches through the service layer and a
//! full websocket round trip against a live server.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use negotiation_copilot::mcts::{CancelFlag, EventSink, SearchConfig};
use negotiation_copilot::oracle::{OracleError, ScoringOracle};
use negotiation_copilot::servers::WebSocketServer;
use negotiation_copilot::services::{NegotiationRequest, NegotiationService};

/// Deterministic oracle: conversations that reached "accept" score 1.0.
struct StubOracle;

#[async_trait]
impl ScoringOracle for StubOracle {
    async fn evaluate(&self, state_description: &str) -> Result<f64, OracleError> {
        Ok(if state_description.contains("accept") {
            1.0
        } else {
            0.3
        })
    }

    async fn generate_actions(
        &self,
        _state_description: &str,
        count: usize,
    ) -> Result<Vec<String>, OracleError> {
        Ok([
            "I accept your offer.",
            "Could you meet me halfway?",
            "That does not work for me.",
        ]
        .iter()
        .take(count)
        .map(|s| s.to_string())
        .collect())
    }
}

fn request() -> NegotiationRequest {
    NegotiationRequest {
        goal: "Agree on a two-week extension".to_string(),
        messages: vec!["We need to talk about the deadline.".to_string()],
        current_turn: 0,
    }
}

fn service(iterations: usize) -> Arc<NegotiationService> {
    Arc::new(NegotiationService::new(
        Arc::new(StubOracle),
        SearchConfig::exhaustive(iterations),
    ))
}

#[tokio::test]
async fn test_search_streams_events_in_order() {
    let service = service(12);
    let mut sink = EventSink::disabled();
    let mut events = sink.attach(256);

    let handle = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .run_search(&request(), sink, CancelFlag::new())
                .await
        })
    };

    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push(serde_json::to_value(&event).unwrap());
    }
    let outcome = handle.await.unwrap().unwrap();

    assert_eq!(outcome.best_reply.as_deref(), Some("I accept your offer."));
    assert_eq!(outcome.iterations_run, 12);

    assert_eq!(collected[0]["event_type"], "initialization");
    let types: Vec<&str> = collected
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"expansion"));
    assert!(types.contains(&"evaluation"));
    assert!(types.contains(&"backprop"));

    // Node counts never shrink across the stream.
    let mut last_total = 0;
    for event in &collected {
        let total = event["total_nodes"].as_u64().unwrap();
        assert!(total >= last_total);
        last_total = total;
    }
    assert_eq!(last_total as usize, outcome.total_nodes);
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(WebSocketServer::serve(listener, service(8), 16));

    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    ws.send(Message::text(serde_json::to_string(&request()).unwrap()))
        .await
        .unwrap();

    let mut complete: Option<Value> = None;
    while let Some(frame) = ws.next().await {
        let frame = frame.unwrap();
        let Message::Text(text) = frame else { break };
        let parsed: Value = serde_json::from_str(text.as_str()).unwrap();
        // Batched frames arrive as arrays, single events as objects.
        let events: Vec<Value> = match parsed {
            Value::Array(items) => items,
            other => vec![other],
        };
        for event in events {
            if event["event_type"] == "complete" && event["metadata"]["search_id"].is_string() {
                complete = Some(event);
            }
        }
        if complete.is_some() {
            break;
        }
    }

    let complete = complete.expect("no terminal event received");
    assert_eq!(
        complete["metadata"]["best_action"],
        "I accept your offer."
    );
    assert_eq!(complete["metadata"]["cancelled"], false);
    assert!(complete["total_nodes"].as_u64().unwrap() > 1);
}

#[tokio::test]
async fn test_websocket_rejects_malformed_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(WebSocketServer::serve(listener, service(4), 16));

    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    ws.send(Message::text("{\"not\": \"a request\"}"))
        .await
        .unwrap();

    let frame = ws.next().await.unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected a text frame");
    };
    let event: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(event["event_type"], "error");
}
