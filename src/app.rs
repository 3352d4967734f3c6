use std::sync::Arc;
use tracing::info;

use crate::cli::{Config, Mode};
use crate::langserver::{self, Documents};
use crate::server::{Acceptor, StdioServer, TcpServer, WebSocketServer};

async fn acceptor(config: &Config) -> anyhow::Result<Box<dyn Acceptor>> {
    let acceptor: Box<dyn Acceptor> = match config.mode {
        Mode::Stdio => Box::new(StdioServer::new()),
        Mode::Tcp => Box::new(TcpServer::bind(config.addr).await?),
        Mode::Websocket => Box::new(WebSocketServer::bind(config.addr).await?),
    };
    Ok(acceptor)
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let router = Arc::new(langserver::router(Arc::new(Documents::new()))?);
    let acceptor = acceptor(&config).await?;
    info!(mode = ?config.mode, version = env!("CARGO_PKG_VERSION"), "server starting");

    tokio::select! {
        result = acceptor.serve(router) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; shutting down");
            Ok(())
        }
    }
}
