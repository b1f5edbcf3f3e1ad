//! Wires [`GatewayState`] into an `axum::Router` and serves it.

use std::{fs, net::SocketAddr, path::PathBuf};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{
    auth::auth_middleware,
    routes::{
        create_chat, enqueue_function, health, resume_approval, send_message, stream_channel,
        GatewayState,
    },
};

const MAX_PORT_ATTEMPTS: u16 = 10;

/// Path to the PID file written on daemon start.
pub fn pid_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".kiln")
        .join("daemon.pid")
}

/// Starts the HTTP gateway, binding to `bind_addr`. If that port is taken,
/// increments up to [`MAX_PORT_ATTEMPTS`] times before giving up. Writes a
/// PID file on successful bind; blocks until the server shuts down.
pub async fn start_gateway(bind_addr: &str, state: GatewayState) -> Result<(), String> {
    let protected = Router::new()
        .route("/api/v1/chats", post(create_chat))
        .route("/api/v1/chats/{chat_id}/messages", post(send_message))
        .route("/api/v1/functions", post(enqueue_function))
        .route("/api/v1/approvals/{approval_id}/resume", post(resume_approval))
        .route("/api/v1/stream/{channel_id}", get(stream_channel))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state.clone());

    let public = Router::new()
        .route("/api/v1/health", get(health))
        .with_state(state);

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // Restrict to known origins in production.

    let listener = bind_with_fallback(bind_addr).await?;
    let addr = listener.local_addr().map_err(|e| e.to_string())?;

    write_pid_file(addr.port())?;
    tracing::info!(%addr, "kiln gateway listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("gateway error: {e}"))
}

async fn bind_with_fallback(bind_addr: &str) -> Result<TcpListener, String> {
    let base: SocketAddr = bind_addr
        .parse()
        .map_err(|e| format!("invalid bind address {bind_addr}: {e}"))?;

    for offset in 0..MAX_PORT_ATTEMPTS {
        let addr = SocketAddr::new(base.ip(), base.port() + offset);
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(_) if offset + 1 < MAX_PORT_ATTEMPTS => continue,
            Err(e) => {
                return Err(format!(
                    "could not bind to any port in {}-{}: {e}",
                    base.port(),
                    base.port() + MAX_PORT_ATTEMPTS - 1
                ));
            }
        }
    }
    unreachable!()
}

fn write_pid_file(port: u16) -> Result<(), String> {
    let path = pid_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create .kiln dir: {e}"))?;
    }
    let content = format!("{}\n{}\n", std::process::id(), port);
    fs::write(&path, content).map_err(|e| format!("failed to write PID file: {e}"))
}
