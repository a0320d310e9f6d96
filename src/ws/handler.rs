//! WebSocket endpoint streaming lifecycle events to UI clients.

use axum::{
    extract::{ws::Message, State, WebSocketUpgrade},
    response::Response,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::api::AppState;

/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let mut events = state.sessions.events().subscribe();
    ws.on_upgrade(move |mut socket| async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(_) => continue,
                        };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // A lagging client has no way to catch up on a live
                    // stream; drop it and let it reconnect and re-list.
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "dropping lagging event subscriber");
                        break;
                    }
                    Err(RecvError::Closed) => break,
                },
                msg = socket.recv() => match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound frames other than close are ignored; the
                    // event stream is effectively one-way.
                    Some(Ok(_)) => {}
                },
            }
        }
    })
}
