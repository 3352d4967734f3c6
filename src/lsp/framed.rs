// low-level framing (Content-Length headers) over tokio byte streams
use crate::lsp::transport::{MessageReader, MessageWriter};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;
const MAX_HEADER_LINE: u64 = 8 * 1024;
const MAX_HEADER_LINES: usize = 32;

pub struct FramedReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        FramedReader {
            reader: BufReader::new(reader),
        }
    }
}

#[async_trait]
impl<R> MessageReader for FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        read_frame_from(&mut self.reader).await
    }
}

pub struct FramedWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(writer: W) -> Self {
        FramedWriter { writer }
    }
}

#[async_trait]
impl<W> MessageWriter for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, json_body: &str) -> anyhow::Result<()> {
        write_message_to(&mut self.writer, json_body).await
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Read a single LSP message from an async reader (Content-Length framing).
/// Returns `None` when the stream ends cleanly between messages.
pub async fn read_message_from<R>(reader: &mut R) -> anyhow::Result<Option<String>>
where
    R: AsyncBufRead + Unpin + Send,
{
    match read_frame_from(reader).await? {
        Some(body) => Ok(Some(String::from_utf8(body)?)),
        None => Ok(None),
    }
}

/// Like [`read_message_from`] but hands back the raw body bytes.
pub async fn read_frame_from<R>(reader: &mut R) -> anyhow::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut content_length: Option<usize> = None;
    let mut in_header = false;
    let mut header_lines = 0;
    let mut line = String::new();

    loop {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_HEADER_LINE)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            if in_header {
                bail!("stream closed inside a message header");
            }
            return Ok(None);
        }
        if !line.ends_with('\n') && read as u64 >= MAX_HEADER_LINE {
            bail!("header line exceeds {} bytes", MAX_HEADER_LINE);
        }

        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if in_header {
                break;
            }
            // stray separator between messages
            continue;
        }
        in_header = true;
        header_lines += 1;
        if header_lines > MAX_HEADER_LINES {
            bail!("more than {} header lines", MAX_HEADER_LINES);
        }

        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed header line: {:?}", header))?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = Some(value.trim().parse::<usize>()?);
        }
    }

    let content_length =
        content_length.ok_or_else(|| anyhow!("Content-Length header not found"))?;
    if content_length > MAX_CONTENT_LENGTH {
        bail!("Content-Length {} exceeds limit", content_length);
    }

    let mut payload_buffer = vec![0u8; content_length];
    reader.read_exact(&mut payload_buffer).await?;

    Ok(Some(payload_buffer))
}

/// Write a single LSP message to an async writer with Content-Length framing.
pub async fn write_message_to<W>(writer: &mut W, json_body: &str) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let header = format!("Content-Length: {}\r\n\r\n", json_body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json_body.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
