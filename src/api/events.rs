//! The events WebSocket: typed server push plus a small client command
//! vocabulary (playback progress relays).

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};

use crate::app::AppState;

async fn events_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut write, mut read) = socket.split();
    let mut rx = state.events.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Lagged subscribers skip missed events instead of
                    // blocking the bus.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped = skipped, "Events socket lagged");
                    }
                    Err(_) => break,
                }
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_command(&state, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

/// Client commands arriving over the socket, e.g. playback progress pushes
/// from the web player.
async fn handle_client_command(state: &AppState, text: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    match value["type"].as_str() {
        Some("playback-progress") => {
            let current = value["payload"]["currentTime"].as_f64().unwrap_or(0.0);
            let duration = value["payload"]["duration"].as_f64().unwrap_or(0.0);
            if let Err(e) = state.playback.progress(current, duration).await {
                tracing::warn!(error = %e, "Playback progress relay failed");
            }
        }
        Some("ping") => {}
        _ => {}
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/events", get(events_ws))
}
