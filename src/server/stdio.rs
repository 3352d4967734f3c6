use crate::lsp::transport::Connection;
use crate::server::{Acceptor, Dispatcher, Router};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Serves exactly one connection over the process's stdin and stdout.
#[derive(Debug, Default)]
pub struct StdioServer;

impl StdioServer {
    pub fn new() -> Self {
        StdioServer
    }
}

#[async_trait]
impl Acceptor for StdioServer {
    async fn serve(self: Box<Self>, router: Arc<Router>) -> anyhow::Result<()> {
        info!("serving on stdio");
        let connection = Connection::framed(tokio::io::stdin(), tokio::io::stdout(), "stdio");
        Dispatcher::new(router, 1).serve(connection).await
    }
}
