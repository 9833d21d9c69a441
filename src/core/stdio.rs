/// STDIO Transport
///
/// Reads a continuous stream of JSON values from the input, answers each
/// request with exactly one JSON line on the output, and stays silent for
/// notifications. Requests are handled strictly one at a time, in order.

use bytes::{Buf, BytesMut};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::dispatcher::Dispatcher;
use crate::core::error::Result;
use crate::core::protocol::{ErrorCode, McpRequest, McpResponse};

const READ_CHUNK: usize = 8192;

/// One decoding step over the buffered input.
#[derive(Debug, PartialEq)]
pub enum Frame {
    /// A complete JSON value.
    Value(Value),
    /// Bytes that could not be decoded were dropped.
    Malformed(String),
}

/// Incremental decoder for whitespace-separated JSON values.
///
/// A syntax error discards input through the end of the offending line so the
/// next record decodes from a clean boundary. A value still incomplete past
/// `max_frame_bytes` is discarded through the next newline.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_bytes: usize,
    /// Prefix of `buf` already known to hold an incomplete value.
    scanned: usize,
    /// Dropping the rest of an oversized frame.
    skipping: bool,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_frame_bytes,
            scanned: 0,
            skipping: false,
        }
    }

    /// Next frame from the buffer, or `None` when more input is needed.
    ///
    /// With `eof` set, a trailing incomplete value is reported as malformed
    /// instead of waiting for bytes that will never arrive.
    pub fn next_frame(&mut self, eof: bool) -> Option<Frame> {
        if self.skipping {
            match self.buf.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    self.buf.advance(newline + 1);
                    self.skipping = false;
                }
                None => {
                    self.buf.clear();
                    self.skipping = !eof;
                    return None;
                }
            }
        }

        if self.scanned == 0 {
            let leading = self
                .buf
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            self.buf.advance(leading);
        }
        if self.buf.is_empty() {
            return None;
        }

        // An incomplete value can only become complete (or fail) once a
        // closing bracket or a newline arrives.
        if !eof
            && self.scanned > 0
            && !self.buf[self.scanned..]
                .iter()
                .any(|b| matches!(b, b'}' | b']' | b'\n'))
        {
            return self.wait_for_more();
        }

        let (decoded, consumed) = {
            let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            let decoded = stream.next();
            (decoded, stream.byte_offset())
        };
        match decoded {
            Some(Ok(_)) if consumed > self.max_frame_bytes => {
                self.scanned = 0;
                self.buf.advance(consumed);
                Some(Frame::Malformed(format!("frame exceeds {} bytes", self.max_frame_bytes)))
            }
            Some(Ok(value)) => {
                self.scanned = 0;
                self.buf.advance(consumed);
                Some(Frame::Value(value))
            }
            Some(Err(e)) if e.is_eof() && eof => self.discard(e.to_string()),
            Some(Err(e)) if e.is_eof() => self.wait_for_more(),
            Some(Err(e)) => match self.buf.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    self.scanned = 0;
                    self.buf.advance(newline + 1);
                    Some(Frame::Malformed(e.to_string()))
                }
                None if eof => self.discard(e.to_string()),
                None => self.wait_for_more(),
            },
            None => None,
        }
    }

    fn wait_for_more(&mut self) -> Option<Frame> {
        self.scanned = self.buf.len();
        if self.buf.len() <= self.max_frame_bytes {
            return None;
        }
        self.skipping = true;
        self.discard(format!("frame exceeds {} bytes", self.max_frame_bytes))
    }

    fn discard(&mut self, reason: String) -> Option<Frame> {
        self.scanned = 0;
        self.buf.clear();
        Some(Frame::Malformed(reason))
    }
}

/// Run the MCP loop over process stdin/stdout until EOF or cancellation.
pub async fn run_stdio(
    dispatcher: Arc<Dispatcher>,
    max_frame_bytes: usize,
    cancel: CancelToken,
) -> Result<()> {
    info!(max_frame_bytes, "MCP server ready on stdio");
    serve(&dispatcher, tokio::io::stdin(), tokio::io::stdout(), max_frame_bytes, cancel).await
}

/// Serve requests from `reader`, writing responses to `writer`.
///
/// Returns `Ok(())` on end of input or when `cancel` fires. Cancellation
/// during a dispatch drops the in-flight call without writing anything.
pub async fn serve<R, W>(
    dispatcher: &Dispatcher,
    reader: R,
    writer: W,
    max_frame_bytes: usize,
    cancel: CancelToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = reader;
    let mut writer = BufWriter::with_capacity(READ_CHUNK, writer);
    let mut decoder = FrameDecoder::new(max_frame_bytes);
    let mut eof = false;

    loop {
        if cancel.is_cancelled() {
            info!("stdio loop cancelled");
            return Ok(());
        }

        let value = match decoder.next_frame(eof) {
            Some(Frame::Value(value)) => value,
            Some(Frame::Malformed(reason)) => {
                // No id can be recovered from undecodable bytes.
                warn!(%reason, "discarding malformed input");
                continue;
            }
            None if eof => {
                info!("stdin closed, stopping stdio loop");
                return Ok(());
            }
            None => {
                decoder.buf.reserve(READ_CHUNK);
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => continue,
                    read = reader.read_buf(&mut decoder.buf) => read?,
                };
                eof = read == 0;
                continue;
            }
        };

        let id = value.get("id").filter(|id| !id.is_null()).cloned();
        let request = match serde_json::from_value::<McpRequest>(value) {
            Ok(request) if request.is_notification() => {
                debug!("ignoring notification");
                continue;
            }
            Ok(request) => request,
            Err(e) => {
                match id {
                    Some(id) => {
                        warn!(reason = %e, "invalid request envelope");
                        let response = McpResponse::failure(Some(id), ErrorCode::ParseError, "Parse error");
                        write_response(&mut writer, &response).await?;
                    }
                    None => warn!(reason = %e, "dropping uncorrelated invalid request"),
                }
                continue;
            }
        };

        debug!(method = %request.method, "dispatching stdio request");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("stdio loop cancelled during dispatch");
                return Ok(());
            }
            response = dispatcher.dispatch(request, &cancel) => response,
        };
        write_response(&mut writer, &response).await?;
    }
}

/// Write one compact JSON response followed by a newline and flush.
async fn write_response<W>(writer: &mut W, response: &McpResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::ServerInfo;
    use crate::core::registry::ToolRegistry;
    use serde_json::json;
    use std::time::Duration;

    const LIMIT: usize = 64 * 1024;

    fn decoder(bytes: &[u8]) -> FrameDecoder {
        let mut decoder = FrameDecoder::new(LIMIT);
        decoder.buf.extend_from_slice(bytes);
        decoder
    }

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(ToolRegistry::new());
        registry.register("echo", "Echo", None, |args, _| async move {
            Ok(json!({ "echoed": args }))
        });
        registry.register("wait", "Blocks until cancelled", None, |_, cancel: CancelToken| async move {
            cancel.cancelled().await;
            Ok(Value::Null)
        });
        Dispatcher::new(
            registry,
            ServerInfo {
                name: "stdio-test".into(),
                version: "0.0.1".into(),
            },
        )
    }

    async fn run(input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve(&dispatcher(), input.as_bytes(), &mut output, LIMIT, CancelToken::new())
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn decoder_splits_values_on_one_line() {
        let mut decoder = decoder(br#"{"a":1} {"b":2}"#);
        assert_eq!(decoder.next_frame(false), Some(Frame::Value(json!({"a": 1}))));
        assert_eq!(decoder.next_frame(false), Some(Frame::Value(json!({"b": 2}))));
        assert_eq!(decoder.next_frame(false), None);
    }

    #[test]
    fn decoder_waits_for_split_value() {
        let mut decoder = decoder(br#"{"method":"#);
        assert_eq!(decoder.next_frame(false), None);
        decoder.buf.extend_from_slice(b"\n\"tools/list\"}");
        assert_eq!(
            decoder.next_frame(false),
            Some(Frame::Value(json!({"method": "tools/list"})))
        );
    }

    #[test]
    fn decoder_resyncs_after_bad_line() {
        let mut decoder = decoder(b"{not json}\n{\"ok\":true}\n");
        assert!(matches!(decoder.next_frame(false), Some(Frame::Malformed(_))));
        assert_eq!(decoder.next_frame(false), Some(Frame::Value(json!({"ok": true}))));
    }

    #[test]
    fn decoder_drops_truncated_tail_at_eof() {
        let mut decoder = decoder(br#"{"id":1,"#);
        assert!(matches!(decoder.next_frame(true), Some(Frame::Malformed(_))));
        assert_eq!(decoder.next_frame(true), None);
    }

    #[test]
    fn decoder_waits_for_closing_byte_before_reparsing() {
        let mut decoder = decoder(br#"{"text":""#);
        assert_eq!(decoder.next_frame(false), None);
        for _ in 0..4 {
            decoder.buf.extend_from_slice(&[b'x'; 1000]);
            assert_eq!(decoder.next_frame(false), None);
            assert_eq!(decoder.scanned, decoder.buf.len());
        }
        decoder.buf.extend_from_slice(br#""}"#);
        let Some(Frame::Value(value)) = decoder.next_frame(false) else {
            panic!("expected a complete value");
        };
        assert_eq!(value["text"].as_str().unwrap().len(), 4000);
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn decoder_still_resyncs_after_waiting() {
        let mut decoder = decoder(br#"{"a":"#);
        assert_eq!(decoder.next_frame(false), None);
        decoder.buf.extend_from_slice(b"oops\n{\"ok\":1}\n");
        assert!(matches!(decoder.next_frame(false), Some(Frame::Malformed(_))));
        assert_eq!(decoder.next_frame(false), Some(Frame::Value(json!({"ok": 1}))));
    }

    #[test]
    fn decoder_drops_oversized_frame_through_next_newline() {
        let mut decoder = FrameDecoder::new(16);
        decoder.buf.extend_from_slice(br#"{"text":"0123456789"#);
        let Some(Frame::Malformed(reason)) = decoder.next_frame(false) else {
            panic!("expected the frame to be dropped");
        };
        assert!(reason.contains("16 bytes"));
        assert!(decoder.buf.is_empty());

        decoder.buf.extend_from_slice(b"abcdef\"}");
        assert_eq!(decoder.next_frame(false), None);
        decoder.buf.extend_from_slice(b"\n{\"ok\":1}\n");
        assert_eq!(decoder.next_frame(false), Some(Frame::Value(json!({"ok": 1}))));
    }

    #[test]
    fn decoder_rejects_complete_value_over_limit() {
        let mut decoder = FrameDecoder::new(8);
        decoder.buf.extend_from_slice(b"{\"text\":\"long enough\"} {\"a\":1}");
        assert!(matches!(decoder.next_frame(false), Some(Frame::Malformed(_))));
        assert_eq!(decoder.next_frame(false), Some(Frame::Value(json!({"a": 1}))));
    }

    #[tokio::test]
    async fn oversized_request_is_skipped_and_next_answered() {
        let big = "y".repeat(2 * READ_CHUNK);
        let input = format!(
            "{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{{\"name\":\"echo\",\"arguments\":{{\"text\":\"{big}\"}}}}}}\n{}\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#
        );
        let mut output = Vec::new();
        serve(&dispatcher(), input.as_bytes(), &mut output, 1024, CancelToken::new())
            .await
            .unwrap();
        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn large_request_within_limit_is_answered() {
        let big = "z".repeat(1024 * 1024);
        let input = format!(
            "{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{{\"name\":\"echo\",\"arguments\":{{\"text\":\"{big}\"}}}}}}"
        );
        let (mut client, server) = tokio::io::duplex(READ_CHUNK);
        tokio::spawn(async move {
            client.write_all(input.as_bytes()).await.unwrap();
        });
        let mut output = Vec::new();
        tokio::time::timeout(
            Duration::from_secs(10),
            serve(&dispatcher(), server, &mut output, 4 * 1024 * 1024, CancelToken::new()),
        )
        .await
        .expect("large request should not stall the loop")
        .unwrap();
        let response: Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(response["id"], json!(1));
        assert!(response["result"]["content"][0]["text"].as_str().unwrap().len() > 1024 * 1024);
    }

    #[tokio::test]
    async fn answers_requests_in_order() {
        let responses = run(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":"two","method":"tools/list"}"#,
            "\n",
        ))
        .await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], json!(1));
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], json!("stdio-test"));
        assert_eq!(responses[1]["id"], json!("two"));
    }

    #[tokio::test]
    async fn notifications_produce_no_output() {
        let responses = run(concat!(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            r#"{"jsonrpc":"2.0","id":null,"method":"bogus"}"#,
            r#"{"jsonrpc":"2.0","method":"tools/list"}"#,
        ))
        .await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn bad_envelope_with_id_gets_parse_error() {
        let responses = run(concat!(
            r#"{"jsonrpc":"2.0","id":42,"method":7}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":43,"method":"tools/list"}"#,
        ))
        .await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], json!(42));
        assert_eq!(responses[0]["error"]["code"], json!(-32700));
        assert_eq!(responses[1]["id"], json!(43));
        assert!(responses[1].get("result").is_some());
    }

    #[tokio::test]
    async fn garbage_without_id_is_skipped() {
        let responses = run(concat!(
            "this is not json\n",
            "[1,2,3]\n",
            r#"{"method":5}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
            "\n",
        ))
        .await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn empty_input_ends_cleanly() {
        assert!(run("").await.is_empty());
        assert!(run("  \n\n ").await.is_empty());
    }

    #[tokio::test]
    async fn output_is_one_compact_line_per_response() {
        let mut output = Vec::new();
        let input = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"html":"<b>&</b>"}}}"#;
        serve(&dispatcher(), input.as_bytes(), &mut output, LIMIT, CancelToken::new())
            .await
            .unwrap();
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches('\n').count(), 1);
        assert!(text.ends_with('\n'));
        assert!(text.contains("<b>&</b>"));
    }

    #[tokio::test]
    async fn cancelled_before_start_writes_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut output = Vec::new();
        let input = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        serve(&dispatcher(), input.as_bytes(), &mut output, LIMIT, cancel)
            .await
            .unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_idle_loop() {
        let (client, server) = tokio::io::duplex(1024);
        let cancel = CancelToken::new();
        let d = dispatcher();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });

        let mut output = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), serve(&d, server, &mut output, LIMIT, cancel))
            .await
            .expect("loop should stop on cancellation")
            .unwrap();
        assert!(output.is_empty());
        drop(client);
    }

    #[tokio::test]
    async fn cancellation_during_dispatch_emits_nothing() {
        let (mut client, server) = tokio::io::duplex(1024);
        let cancel = CancelToken::new();
        let d = dispatcher();

        client
            .write_all(br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"wait"}}"#)
            .await
            .unwrap();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });

        let mut output = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), serve(&d, server, &mut output, LIMIT, cancel))
            .await
            .expect("loop should stop on cancellation")
            .unwrap();
        assert!(output.is_empty());
    }
}
