//! WebSocket carrier: one JSON body per frame, no Content-Length headers.
use crate::lsp::transport::{Connection, MessageReader, MessageWriter};
use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

pub struct WsReader {
    stream: SplitStream<WebSocket>,
}

pub struct WsWriter {
    sink: SplitSink<WebSocket, WsMessage>,
}

#[async_trait]
impl MessageReader for WsReader {
    async fn read(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                WsMessage::Text(text) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                WsMessage::Binary(bytes) => return Ok(Some(bytes.to_vec())),
                WsMessage::Close(_) => return Ok(None),
                // ping/pong are answered by the websocket layer
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl MessageWriter for WsWriter {
    async fn write(&mut self, json_body: &str) -> anyhow::Result<()> {
        self.sink
            .send(WsMessage::Text(json_body.to_owned().into()))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

pub fn websocket_connection(socket: WebSocket, peer: impl Into<String>) -> Connection {
    let (sink, stream) = socket.split();
    Connection::new(
        Box::new(WsReader { stream }),
        Box::new(WsWriter { sink }),
        peer,
    )
}
