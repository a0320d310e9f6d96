//! Dynamic reverse proxy for `/terminal/<name>/...`.
//!
//! Every request resolves its session name against the live registry; the
//! resolved port is never cached, since a restart moves the session to a new
//! port and a stale mapping could silently reach an unrelated process that
//! later claims the old number. Plain requests are forwarded through the
//! shared hyper client; upgrade requests are recognized separately, dialed
//! with tokio-tungstenite and spliced frame-by-frame in both directions.

use axum::{
    body::Body,
    extract::{
        ws::{Message as ClientMessage, WebSocket},
        FromRequestParts, Path, State, WebSocketUpgrade,
    },
    http::{header, request::Parts, HeaderMap, Request, Uri},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as BackendMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::error::ApiError;
use super::state::AppState;

/// /terminal/{name}
pub async fn proxy_terminal_root(
    State(state): State<AppState>,
    Path(name): Path<String>,
    req: Request<Body>,
) -> Result<Response, ApiError> {
    proxy_terminal(state, name, req).await
}

/// /terminal/{name}/{*path}
pub async fn proxy_terminal_path(
    State(state): State<AppState>,
    Path((name, _rest)): Path<(String, String)>,
    req: Request<Body>,
) -> Result<Response, ApiError> {
    proxy_terminal(state, name, req).await
}

async fn proxy_terminal(
    state: AppState,
    name: String,
    req: Request<Body>,
) -> Result<Response, ApiError> {
    // Re-resolved on every request; see module docs.
    let port = state
        .sessions
        .backend_port(&name)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no running session \"{name}\"")))?;

    if is_websocket_upgrade(req.headers()) {
        let (mut parts, _body) = req.into_parts();
        let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &())
            .await
            .map_err(|err| ApiError::BadRequest(err.to_string()))?;
        proxy_upgrade(upgrade, &parts, port).await
    } else {
        forward_request(state, req, port).await
    }
}

/// Upgrade requests use a different completion signal than bounded
/// request/response exchanges, so they are recognized up front by the
/// `Upgrade` header rather than extracted implicitly.
fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Forward a plain HTTP request to the backend, rewriting only the
/// destination and keeping the original path, query, headers and body.
async fn forward_request(
    state: AppState,
    mut req: Request<Body>,
    port: u16,
) -> Result<Response, ApiError> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("http://127.0.0.1:{port}{path_and_query}");
    debug!(%target, "proxying request");

    let uri: Uri = target
        .parse()
        .map_err(|err| ApiError::bad_gateway(format!("invalid target uri: {err}")))?;
    *req.uri_mut() = uri;

    if let Some(authority) = req.uri().authority() {
        let value = header::HeaderValue::from_str(authority.as_str())
            .map_err(|err| ApiError::bad_gateway(format!("invalid host header: {err}")))?;
        req.headers_mut().insert(header::HOST, value);
    }

    let response = state
        .http_client
        .request(req)
        .await
        .map_err(|err| ApiError::bad_gateway(format!("backend unreachable: {err}")))?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}

/// Handle a protocol-upgrade request: dial the backend first so connect
/// failures still surface as a gateway error, then complete the client
/// upgrade and splice the two sockets.
async fn proxy_upgrade(
    upgrade: WebSocketUpgrade,
    parts: &Parts,
    port: u16,
) -> Result<Response, ApiError> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let subprotocol = parts
        .headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let target = format!("ws://127.0.0.1:{port}{path_and_query}");
    let mut backend_req = target
        .clone()
        .into_client_request()
        .map_err(|err| ApiError::bad_gateway(format!("invalid upgrade target: {err}")))?;
    if let Some(protocol) = &subprotocol {
        let value = header::HeaderValue::from_str(protocol)
            .map_err(|err| ApiError::bad_gateway(format!("invalid subprotocol: {err}")))?;
        backend_req
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
    }

    let (backend, backend_response) = connect_async(backend_req)
        .await
        .map_err(|err| ApiError::bad_gateway(format!("backend upgrade failed: {err}")))?;
    debug!(%target, "upgrade proxied to backend");

    // Echo the subprotocol the backend actually agreed to.
    let mut upgrade = upgrade;
    if let Some(agreed) = backend_response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        upgrade = upgrade.protocols([agreed.to_string()]);
    }

    Ok(upgrade.on_upgrade(move |client| async move {
        if let Err(err) = splice(client, backend).await {
            warn!(port, error = %err, "terminal stream ended with error");
        }
    }))
}

/// Pump frames both ways until either side closes or errors.
async fn splice(
    client: WebSocket,
    backend: WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> anyhow::Result<()> {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let client_to_backend = async {
        while let Some(msg) = client_rx.next().await {
            let forward = match msg? {
                ClientMessage::Text(text) => BackendMessage::Text(text.to_string().into()),
                ClientMessage::Binary(data) => BackendMessage::Binary(data),
                ClientMessage::Ping(data) => BackendMessage::Ping(data),
                ClientMessage::Pong(data) => BackendMessage::Pong(data),
                ClientMessage::Close(_) => {
                    let _ = backend_tx.send(BackendMessage::Close(None)).await;
                    break;
                }
            };
            backend_tx.send(forward).await?;
        }
        Ok::<(), anyhow::Error>(())
    };

    let backend_to_client = async {
        while let Some(msg) = backend_rx.next().await {
            let forward = match msg? {
                BackendMessage::Text(text) => ClientMessage::Text(text.to_string().into()),
                BackendMessage::Binary(data) => ClientMessage::Binary(data),
                BackendMessage::Ping(data) => ClientMessage::Ping(data),
                BackendMessage::Pong(data) => ClientMessage::Pong(data),
                BackendMessage::Close(_) => {
                    let _ = client_tx.send(ClientMessage::Close(None)).await;
                    break;
                }
                BackendMessage::Frame(_) => continue,
            };
            client_tx.send(forward).await?;
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = client_to_backend => result?,
        result = backend_to_client => result?,
    }

    Ok(())
}
