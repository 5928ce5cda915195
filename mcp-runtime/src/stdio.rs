//! Stdio transport: `Content-Length` framing or newline-delimited JSON.
//!
//! The framing is picked once from the first non-blank line and kept for the
//! life of the stream. Messages are handled strictly one at a time.

use std::io::ErrorKind;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::rpc::{McpServer, RpcError, error_response, is_notification};

/// Largest body accepted in framed mode.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

static CONTENT_LENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^content-length:\s*(\d+)$").expect("valid content-length regex")
});

fn content_length(line: &[u8]) -> Option<usize> {
    let line = std::str::from_utf8(line).ok()?;
    CONTENT_LENGTH
        .captures(line.trim())
        .and_then(|captures| captures[1].parse().ok())
}

fn is_blank(line: &[u8]) -> bool {
    line.trim_ascii().is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// `Content-Length: N` headers, a blank line, then N bytes of JSON.
    Framed,
    /// One JSON value per line.
    LineDelimited,
}

#[derive(Debug)]
pub enum Incoming {
    Message(Value),
    /// Per-message failure; answered with `id: null` and the stream continues.
    Malformed(RpcError),
    Eof,
}

pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
    mode: FramingMode,
    pending: Option<Vec<u8>>,
    /// Body bytes of a rejected oversized frame still to be skipped.
    discard: u64,
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Sniff the framing from the first non-blank line. `None` on an empty stream.
    pub async fn detect(mut reader: R, writer: W) -> io::Result<Option<Self>> {
        loop {
            let Some(line) = read_line(&mut reader).await? else {
                return Ok(None);
            };
            if is_blank(&line) {
                continue;
            }
            let mode = if content_length(&line).is_some() {
                FramingMode::Framed
            } else {
                FramingMode::LineDelimited
            };
            return Ok(Some(Self {
                reader,
                writer,
                mode,
                pending: Some(line),
                discard: 0,
            }));
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        read_line(&mut self.reader).await
    }

    pub async fn read_next(&mut self) -> io::Result<Incoming> {
        match self.mode {
            FramingMode::Framed => self.read_framed().await,
            FramingMode::LineDelimited => self.read_line_delimited().await,
        }
    }

    async fn read_framed(&mut self) -> io::Result<Incoming> {
        if !self.skip_discarded_body().await? {
            return Ok(Incoming::Eof);
        }

        let mut headers = Vec::new();
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(Incoming::Eof);
            };
            if is_blank(&line) {
                if headers.is_empty() {
                    continue;
                }
                break;
            }
            headers.push(line);
        }

        let Some(length) = headers.iter().find_map(|header| content_length(header)) else {
            return Ok(Incoming::Malformed(RpcError::missing_content_length()));
        };

        if length > MAX_FRAME_BYTES {
            tracing::warn!(event = "stdio_frame_too_large", length, limit = MAX_FRAME_BYTES);
            self.discard = length as u64;
            return Ok(Incoming::Malformed(RpcError::invalid_request(Some(
                "Content-Length exceeds the frame size limit",
            ))));
        }

        let mut body = vec![0_u8; length];
        match self.reader.read_exact(&mut body).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(Incoming::Eof),
            Err(err) => return Err(err),
        }

        Ok(decode(&body))
    }

    /// Drop the body of a previously rejected frame. False when input ends first.
    async fn skip_discarded_body(&mut self) -> io::Result<bool> {
        if self.discard == 0 {
            return Ok(true);
        }
        let expected = std::mem::take(&mut self.discard);
        let skipped = io::copy(&mut (&mut self.reader).take(expected), &mut io::sink()).await?;
        Ok(skipped == expected)
    }

    async fn read_line_delimited(&mut self) -> io::Result<Incoming> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(Incoming::Eof);
            };
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            return Ok(decode(line));
        }
    }

    pub async fn write_response(&mut self, response: &Value) -> io::Result<()> {
        let body = serde_json::to_vec(response)?;
        match self.mode {
            FramingMode::Framed => {
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                self.writer.write_all(header.as_bytes()).await?;
                self.writer.write_all(&body).await?;
            }
            FramingMode::LineDelimited => {
                self.writer.write_all(&body).await?;
                self.writer.write_all(b"\n").await?;
            }
        }
        self.writer.flush().await
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let read = reader.read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(buf))
}

fn decode(bytes: &[u8]) -> Incoming {
    match serde_json::from_slice(bytes) {
        Ok(message) => Incoming::Message(message),
        Err(err) => {
            tracing::debug!(event = "stdio_parse_error", error = %err);
            Incoming::Malformed(RpcError::parse_error())
        }
    }
}

/// Serve requests from `reader` until end of input.
pub async fn serve<R, W>(server: &McpServer, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(mut transport) = StdioTransport::detect(reader, writer).await? else {
        return Ok(());
    };
    tracing::info!(event = "stdio_framing_selected", mode = ?transport.mode());

    loop {
        match transport.read_next().await? {
            Incoming::Eof => break,
            Incoming::Malformed(err) => {
                transport
                    .write_response(&error_response(Value::Null, err))
                    .await?;
            }
            Incoming::Message(message) => {
                let notification = is_notification(&message);
                let method = message
                    .get("method")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                let response = server.handle(message).await;
                if notification {
                    tracing::debug!(event = "notification_handled", method = method.as_deref());
                    continue;
                }
                transport.write_response(&response).await?;
            }
        }
    }

    tracing::info!(event = "stdio_closed");
    Ok(())
}

pub async fn serve_stdio(server: &McpServer) -> io::Result<()> {
    serve(server, BufReader::new(io::stdin()), io::stdout()).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::test_support::Fixture;

    fn frame(body: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
    }

    async fn run(input: &[u8]) -> Vec<u8> {
        let fixture = Fixture::default();
        let server = McpServer::new(Arc::new(fixture.toolbox()));
        let mut output = Vec::new();
        serve(&server, BufReader::new(input), &mut output)
            .await
            .unwrap();
        output
    }

    fn decode_frames(mut bytes: &[u8]) -> Vec<Value> {
        let mut frames = Vec::new();
        while !bytes.is_empty() {
            let text = std::str::from_utf8(bytes).unwrap();
            let split = text.find("\r\n\r\n").unwrap();
            let length = content_length(text[..split].as_bytes()).unwrap();
            let start = split + 4;
            frames.push(serde_json::from_slice(&bytes[start..start + length]).unwrap());
            bytes = &bytes[start + length..];
        }
        frames
    }

    fn decode_lines(bytes: &[u8]) -> Vec<Value> {
        std::str::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn framed_request_gets_one_framed_response() {
        let input = frame(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#);
        let output = run(input.as_bytes()).await;

        assert!(output.starts_with(b"Content-Length: "));
        let frames = decode_frames(&output);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["id"], json!(1));
        assert_eq!(frames[0]["result"]["protocolVersion"], json!("2024-09"));
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive_and_stray_blank_lines_are_skipped() {
        let body = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
        let input = format!(
            "\r\ncontent-length: {}\r\n\r\n{}\r\n\r\n{}",
            body.len(),
            body,
            frame(r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#)
        );
        let frames = decode_frames(&run(input.as_bytes()).await);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["id"], json!(2));
        assert_eq!(frames[1]["id"], json!(3));
    }

    #[tokio::test]
    async fn notifications_produce_no_output() {
        let input = format!(
            "{}{}",
            frame(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
            frame(r#"{"jsonrpc":"2.0","id":null,"method":"tools/list"}"#)
        );
        assert!(run(input.as_bytes()).await.is_empty());
    }

    #[tokio::test]
    async fn missing_content_length_is_reported_and_the_stream_continues() {
        let input = format!(
            "{}X-Trace: abc\r\n\r\n{}",
            frame(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#),
            frame(r#"{"jsonrpc":"2.0","id":2,"method":"initialize"}"#)
        );
        let frames = decode_frames(&run(input.as_bytes()).await);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1]["id"], Value::Null);
        assert_eq!(frames[1]["error"]["code"], json!(-32600));
        assert_eq!(frames[1]["error"]["message"], json!("Missing Content-Length"));
        assert_eq!(frames[2]["id"], json!(2));
    }

    #[tokio::test]
    async fn malformed_framed_body_is_a_parse_error() {
        let input = format!(
            "{}{}",
            frame("{oops}"),
            frame(r#"{"jsonrpc":"2.0","id":7,"method":"initialize"}"#)
        );
        let frames = decode_frames(&run(input.as_bytes()).await);
        assert_eq!(frames[0]["error"]["code"], json!(-32700));
        assert_eq!(frames[1]["id"], json!(7));
    }

    #[tokio::test]
    async fn truncated_body_ends_the_loop_silently() {
        let output = run(b"Content-Length: 100\r\n\r\n{\"jsonrpc\"").await;
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn line_mode_isolates_malformed_lines() {
        let input = concat!(
            "not json\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\"}\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/call\",\"params\":{\"name\":\"nope\"}}\n",
        );
        let responses = decode_lines(&run(input.as_bytes()).await);

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["error"]["code"], json!(-32700));
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1]["id"], json!(1));
        assert_eq!(responses[2]["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn empty_input_writes_nothing() {
        assert!(run(b"").await.is_empty());
        assert!(run(b"\n\n").await.is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_without_allocating() {
        let output = run(b"Content-Length: 18446744073709551615\r\n\r\n{}").await;
        let frames = decode_frames(&output);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["id"], Value::Null);
        assert_eq!(frames[0]["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn oversized_body_is_skipped_and_the_stream_continues() {
        let mut input = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1).into_bytes();
        input.resize(input.len() + MAX_FRAME_BYTES + 1, b' ');
        input.extend_from_slice(frame(r#"{"jsonrpc":"2.0","id":4,"method":"initialize"}"#).as_bytes());

        let frames = decode_frames(&run(&input).await);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["error"]["code"], json!(-32600));
        assert_eq!(frames[1]["id"], json!(4));
    }

    #[tokio::test]
    async fn written_frame_reads_back_unchanged() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": 9,
            "result": { "analysis": "Café: totales coherentes", "lines": [1, 2, 3] }
        });
        let mut writer = StdioTransport::detect(
            BufReader::new(&b"Content-Length: 2\r\n\r\n{}"[..]),
            Vec::<u8>::new(),
        )
        .await
        .unwrap()
        .unwrap();
        writer.write_response(&response).await.unwrap();
        let wire = writer.writer;

        let split = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        assert_eq!(content_length(&wire[..split]), Some(wire.len() - split - 4));

        let mut reader = StdioTransport::detect(BufReader::new(&wire[..]), Vec::<u8>::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reader.mode(), FramingMode::Framed);
        match reader.read_next().await.unwrap() {
            Incoming::Message(message) => assert_eq!(message, response),
            other => panic!("expected a message, got {other:?}"),
        }
        assert!(matches!(reader.read_next().await.unwrap(), Incoming::Eof));
    }

    #[tokio::test]
    async fn line_with_invalid_utf8_is_a_parse_error() {
        let mut input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"x\":\"\xff\"}\n".to_vec();
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"initialize\"}\n");

        let responses = decode_lines(&run(&input).await);

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], json!(-32700));
        assert_eq!(responses[1]["id"], json!(2));
    }

    #[tokio::test]
    async fn detect_picks_mode_from_first_line() {
        let framed = StdioTransport::detect(BufReader::new(&b"Content-Length: 2\r\n\r\n{}"[..]), Vec::<u8>::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(framed.mode(), FramingMode::Framed);

        let lines = StdioTransport::detect(BufReader::new(&b"{}\n"[..]), Vec::<u8>::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lines.mode(), FramingMode::LineDelimited);
    }
}
