use crate::lsp::transport::Connection;
use crate::server::{Acceptor, Dispatcher, Router, ServerError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Content-Length framed sessions over TCP, one dispatcher per socket.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(TcpServer { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Acceptor for TcpServer {
    async fn serve(self: Box<Self>, router: Arc<Router>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "listening for tcp connections");
        let mut next_id: u64 = 0;
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            next_id += 1;
            let connection_id = next_id;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "could not set TCP_NODELAY");
            }
            info!(connection = connection_id, %peer, "accepted connection");

            let (reader, writer) = stream.into_split();
            let connection = Connection::framed(reader, writer, peer.to_string());
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                match Dispatcher::new(router, connection_id).serve(connection).await {
                    Ok(()) => info!(connection = connection_id, "connection closed"),
                    Err(e) => warn!(connection = connection_id, error = %e, "connection failed"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::framed::{read_message_from, write_message_to};
    use crate::server::MethodKind;
    use crate::server::RequestContext;
    use serde_json::{json, Value};
    use tokio::io::BufReader;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    fn router() -> Arc<Router> {
        let mut builder = Router::builder();
        builder
            .register(
                "test/echo",
                MethodKind::ReadOnly,
                |_cx: RequestContext, params: Option<Value>| async move {
                    Ok::<_, crate::lsp::ResponseError>(params.unwrap_or(Value::Null))
                },
            )
            .unwrap();
        Arc::new(builder.build())
    }

    async fn start() -> SocketAddr {
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(Box::new(server).serve(router()));
        addr
    }

    async fn call(
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        message: Value,
    ) -> Value {
        write_message_to(writer, &message.to_string()).await.unwrap();
        let body = timeout(Duration::from_secs(5), read_message_from(reader))
            .await
            .expect("timed out")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&body).unwrap()
    }

    #[tokio::test]
    async fn test_connections_have_independent_lifecycles() {
        let addr = start().await;

        let (a_read, mut a_write) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut a_read = BufReader::new(a_read);
        let (b_read, mut b_write) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut b_read = BufReader::new(b_read);

        let response = call(
            &mut a_read,
            &mut a_write,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        )
        .await;
        assert!(response["result"]["capabilities"].is_object());

        // b has not initialized yet
        let response = call(
            &mut b_read,
            &mut b_write,
            json!({"jsonrpc": "2.0", "id": 1, "method": "test/echo", "params": 1}),
        )
        .await;
        assert_eq!(response["error"]["message"], json!("transport must be initialized"));

        let response = call(
            &mut a_read,
            &mut a_write,
            json!({"jsonrpc": "2.0", "id": 2, "method": "test/echo", "params": 2}),
        )
        .await;
        assert_eq!(response["result"], json!(2));

        // a shutting down leaves b untouched
        call(
            &mut a_read,
            &mut a_write,
            json!({"jsonrpc": "2.0", "id": 3, "method": "shutdown"}),
        )
        .await;
        let response = call(
            &mut b_read,
            &mut b_write,
            json!({"jsonrpc": "2.0", "id": 2, "method": "initialize"}),
        )
        .await;
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn test_bind_in_use_reports_bind_error() {
        let first = TcpServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = first.local_addr().unwrap();

        let err = TcpServer::bind(addr).await.err().unwrap();
        match err {
            ServerError::Bind { addr: failed, .. } => assert_eq!(failed, addr),
            other => panic!("unexpected error: {}", other),
        }
    }
}
