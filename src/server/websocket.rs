use crate::lsp::websocket::websocket_connection;
use crate::server::{Acceptor, Dispatcher, Router, ServerError};
use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    router: Arc<Router>,
    next_id: Arc<AtomicU64>,
}

/// Sessions over WebSocket: an HTTP GET on `/` upgrades, then every text
/// frame carries one JSON-RPC message.
pub struct WebSocketServer {
    listener: TcpListener,
}

impl WebSocketServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(WebSocketServer { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

fn app(router: Arc<Router>) -> axum::Router {
    let state = AppState {
        router,
        next_id: Arc::new(AtomicU64::new(0)),
    };
    axum::Router::new()
        .route("/", get(upgrade))
        .with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let connection_id = state.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    ws.on_failed_upgrade(move |e| {
        warn!(connection = connection_id, %peer, error = %e, "websocket upgrade failed")
    })
    .on_upgrade(move |socket| async move {
        info!(connection = connection_id, %peer, "accepted websocket connection");
        let connection = websocket_connection(socket, peer.to_string());
        match Dispatcher::new(state.router, connection_id)
            .serve(connection)
            .await
        {
            Ok(()) => info!(connection = connection_id, "connection closed"),
            Err(e) => warn!(connection = connection_id, error = %e, "connection failed"),
        }
    })
}

#[async_trait]
impl Acceptor for WebSocketServer {
    async fn serve(self: Box<Self>, router: Arc<Router>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "listening for websocket connections");
        let service = app(router).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(self.listener, service).await?;
        Ok(())
    }
}
