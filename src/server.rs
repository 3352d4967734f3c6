//! Session layer: accepts connections and drives one dispatcher per peer.
pub mod cancel;
pub mod dispatcher;
pub mod lifecycle;
pub mod router;
pub mod session;
pub mod stdio;
pub mod tcp;
pub mod websocket;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

pub use dispatcher::Dispatcher;
pub use router::{MethodKind, RequestContext, Router, RouterBuilder};
pub use stdio::StdioServer;
pub use tcp::TcpServer;
pub use websocket::WebSocketServer;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A transport that produces connections and serves each with a
/// [`Dispatcher`] over the shared `router`.
#[async_trait]
pub trait Acceptor: Send {
    async fn serve(self: Box<Self>, router: Arc<Router>) -> anyhow::Result<()>;
}
