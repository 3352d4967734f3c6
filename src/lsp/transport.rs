//! Duplex message channel shared by every carrier (stdio, TCP, WebSocket).
use crate::lsp::framed::{FramedReader, FramedWriter};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Read half of a connection.
/// - `read` returns the next JSON body as raw bytes (framing already
///   stripped), or `None` once the peer has closed the stream. Bodies are not
///   checked for UTF-8 here; that is the parser's job.
#[async_trait]
pub trait MessageReader: Send {
    async fn read(&mut self) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Write half of a connection.
/// - `write` takes a JSON body and frames it for the carrier.
#[async_trait]
pub trait MessageWriter: Send {
    async fn write(&mut self, json_body: &str) -> anyhow::Result<()>;
    async fn close(&mut self) -> anyhow::Result<()>;
}

pub struct Connection {
    pub reader: Box<dyn MessageReader>,
    pub writer: Box<dyn MessageWriter>,
    pub peer: String,
}

impl Connection {
    pub fn new(
        reader: Box<dyn MessageReader>,
        writer: Box<dyn MessageWriter>,
        peer: impl Into<String>,
    ) -> Self {
        Connection {
            reader,
            writer,
            peer: peer.into(),
        }
    }

    /// Content-Length framed connection over any byte stream pair.
    pub fn framed<R, W>(reader: R, writer: W, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Connection::new(
            Box::new(FramedReader::new(reader)),
            Box::new(FramedWriter::new(writer)),
            peer,
        )
    }
}
