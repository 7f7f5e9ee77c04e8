//! Newline-delimited stdio transport.
//!
//! - Messages are UTF-8 encoded JSON-RPC, one per line
//! - Messages must not contain embedded newlines
//! - stdin carries client messages, stdout carries server messages
//! - stderr is left for logging
//!
//! The transport is generic over its reader and writer so the same framing
//! runs over in-memory pipes in tests.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

use crate::mcp::protocol::{JsonRpcMessage, Reply};

/// Line-framed JSON-RPC transport. Defaults to the process's stdin/stdout.
pub struct StdioTransport<R = BufReader<Stdin>, W = Stdout> {
    reader: R,
    writer: W,
}

impl StdioTransport {
    /// Creates a transport over the process's stdin and stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a transport over arbitrary streams.
    pub const fn with_io(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Reads the next line as raw bytes, without its terminator.
    ///
    /// Returns `None` once the input is closed. The bytes are not checked for
    /// UTF-8, so a bad line does not end the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut frame = Vec::new();
        if self.reader.read_until(b'\n', &mut frame).await? == 0 {
            return Ok(None);
        }

        if frame.last() == Some(&b'\n') {
            frame.pop();
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }
        }

        Ok(Some(frame))
    }

    /// Writes a dispatcher reply as one line (an object or a batch array).
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_reply(&mut self, reply: &Reply) -> io::Result<()> {
        self.write_json(reply).await
    }

    /// Writes a single envelope as one line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_message(&mut self, message: &JsonRpcMessage) -> io::Result<()> {
        self.write_json(message).await
    }

    async fn write_json<T: Serialize + Sync>(&mut self, value: &T) -> io::Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_raw(&json).await
    }

    /// Writes a pre-serialised line and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn write_raw(&mut self, json: &str) -> io::Result<()> {
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Consumes the transport, returning its streams.
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse, RequestId};

    #[tokio::test]
    async fn reads_lines_and_strips_terminators() {
        let input: &[u8] = b"{\"a\":1}\r\n\n{\"b\":2}";
        let mut transport = StdioTransport::with_io(input, Vec::new());

        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(&b"{\"a\":1}"[..]));
        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(&b""[..]));
        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(&b"{\"b\":2}"[..]));
        assert_eq!(transport.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_one_line_per_reply() {
        let mut transport = StdioTransport::with_io(&b""[..], Vec::new());

        let response = JsonRpcResponse::success(
            RequestId::Number(1),
            serde_json::json!({"message": "hello\nworld", "nested": {"key": "value"}}),
        );
        transport
            .write_reply(&Reply::Single(response.into()))
            .await
            .unwrap();
        transport
            .write_reply(&Reply::Batch(vec![JsonRpcError::parse_error().into()]))
            .await
            .unwrap();

        let (_, written) = transport.into_inner();
        let text = String::from_utf8(written).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(r#"{"jsonrpc":"2.0","id":1"#));
        assert!(lines[1].starts_with('['));
    }

    #[tokio::test]
    async fn lines_split_across_reads_are_joined() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",")
            .read(b"\"method\":\"ping\"}\n{\"x\"")
            .read(b":1}\n")
            .build();
        let writer = tokio_test::io::Builder::new()
            .write(br#"{"jsonrpc":"2.0","method":"ping"}"#)
            .write(b"\n")
            .build();
        let mut transport = StdioTransport::with_io(BufReader::new(reader), writer);

        let line = String::from_utf8(transport.read_frame().await.unwrap().unwrap()).unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","method":"ping"}"#);
        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(&br#"{"x":1}"#[..]));
        assert_eq!(transport.read_frame().await.unwrap(), None);

        transport.write_raw(&line).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_utf8_is_returned_not_raised() {
        let input: &[u8] = b"\xff\xfe\nok\n";
        let mut transport = StdioTransport::with_io(input, Vec::new());

        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(&b"\xff\xfe"[..]));
        assert_eq!(transport.read_frame().await.unwrap().as_deref(), Some(&b"ok"[..]));
    }

    #[test]
    fn default_uses_process_streams() {
        let _transport = StdioTransport::default();
    }
}
