//! Server-Sent Events framing for response streams
//!
//! Wire format: one `data: <json>\n\n` frame per [`RunnableResponseDelta`].
//! A failure after the stream started is sent as a single final frame
//! `data: {"error":{"message":"..."}}`.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AigneError;
use crate::runnable::{ResponseStream, RunnableResponseDelta};

/// `{ "error": { "message": ... } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: ErrorMessage {
                message: message.into(),
            },
        }
    }
}

// ═══════════════════════════════════════════
// ENCODING
// ═══════════════════════════════════════════

pub fn encode_delta(delta: &RunnableResponseDelta) -> Result<String, AigneError> {
    let json = serde_json::to_string(delta).map_err(|e| AigneError::Stream {
        message: format!("Failed to encode delta: {}", e),
    })?;
    Ok(format!("data: {}\n\n", json))
}

pub fn encode_error(err: &AigneError) -> String {
    let body = serde_json::to_string(&ErrorBody::new(err.to_string()))
        .unwrap_or_else(|_| r#"{"error":{"message":"unknown error"}}"#.to_string());
    format!("data: {}\n\n", body)
}

/// Frames for a whole response stream, ending after the first error
pub fn encode_stream(deltas: ResponseStream) -> impl Stream<Item = String> + Send + 'static {
    stream::unfold((deltas, false), |(mut deltas, failed)| async move {
        if failed {
            return None;
        }
        match deltas.next().await? {
            Ok(delta) => match encode_delta(&delta) {
                Ok(frame) => Some((frame, (deltas, false))),
                Err(err) => Some((encode_error(&err), (deltas, true))),
            },
            Err(err) => Some((encode_error(&err), (deltas, true))),
        }
    })
}

// ═══════════════════════════════════════════
// DECODING
// ═══════════════════════════════════════════

/// Decode one `data:` payload
pub fn decode_delta(data: &str) -> Result<RunnableResponseDelta, AigneError> {
    let value: Value = serde_json::from_str(data).map_err(|e| AigneError::Stream {
        message: format!("Invalid frame: {}", e),
    })?;
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(AigneError::Stream { message });
    }
    serde_json::from_value(value).map_err(|e| AigneError::Stream {
        message: format!("Invalid delta: {}", e),
    })
}

/// Response stream from an SSE byte stream
pub fn decode_stream<S>(byte_stream: S) -> ResponseStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    data_lines(byte_stream)
        .map(|line| line.and_then(|data| decode_delta(&data)))
        .scan(false, |done, item| {
            if *done {
                return std::future::ready(None);
            }
            *done = item.is_err();
            std::future::ready(Some(item))
        })
        .boxed()
}

/// Extract `data:` payloads from a chunked SSE body
///
/// Skips comments, other fields, empty payloads and `[DONE]`. A transport
/// error is yielded once and ends the stream.
pub fn data_lines<S>(byte_stream: S) -> impl Stream<Item = Result<String, AigneError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), false),
        |(mut byte_stream, mut buffer, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line = buffer.split_to(newline_pos + 1);
                    line.truncate(line.len() - 1);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    let Ok(line) = std::str::from_utf8(&line) else {
                        continue;
                    };
                    if let Some(data) = extract_data(line) {
                        return Some((Ok(data), (byte_stream, buffer, false)));
                    }
                    continue;
                }

                match byte_stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(err)) => {
                        return Some((
                            Err(AigneError::Stream {
                                message: format!("Connection error: {}", err),
                            }),
                            (byte_stream, buffer, true),
                        ));
                    }
                    None => {
                        // Unterminated last line
                        let rest = std::str::from_utf8(&buffer).ok().and_then(extract_data);
                        return rest.map(|data| (Ok(data), (byte_stream, BytesMut::new(), true)));
                    }
                }
            }
        },
    )
}

fn extract_data(line: &str) -> Option<String> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() || data == "[DONE]" {
        None
    } else {
        Some(data.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static {
        let owned: Vec<Result<Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(owned)
    }

    #[test]
    fn delta_frame_format() {
        let frame = encode_delta(&RunnableResponseDelta::text("hi")).unwrap();
        assert_eq!(frame, "data: {\"$text\":\"hi\"}\n\n");
    }

    #[test]
    fn error_frame_decodes_to_stream_error() {
        let err = AigneError::upstream("model", "overloaded");
        let frame = encode_error(&err);
        let data = frame.trim_start_matches("data: ").trim_end();
        match decode_delta(data) {
            Err(AigneError::Stream { message }) => assert!(message.contains("overloaded")),
            other => panic!("expected stream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let lines: Vec<_> = data_lines(chunks(&[
            ": keep-alive\n",
            "data: {\"a\"",
            ":1}\r\n\ndata: [DONE]\n",
            "event: x\ndata: tail",
        ]))
        .collect()
        .await;

        let lines: Vec<String> = lines.into_iter().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["{\"a\":1}".to_string(), "tail".to_string()]);
    }

    #[tokio::test]
    async fn decode_stream_stops_at_error_frame() {
        let items: Vec<_> = decode_stream(chunks(&[
            "data: {\"$text\":\"He\"}\n\n",
            "data: {\"delta\":{\"n\":1}}\n\n",
            "data: {\"error\":{\"message\":\"boom\"}}\n\n",
            "data: {\"$text\":\"ignored\"}\n\n",
        ]))
        .collect()
        .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().text.as_deref(), Some("He"));
        assert_eq!(
            items[1].as_ref().unwrap().delta,
            json!({"n": 1}).as_object().cloned()
        );
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn encode_stream_ends_after_error() {
        let deltas: ResponseStream = stream::iter(vec![
            Ok(RunnableResponseDelta::text("a")),
            Err(AigneError::Stream {
                message: "cut".into(),
            }),
            Ok(RunnableResponseDelta::text("never")),
        ])
        .boxed();
        let frames: Vec<String> = encode_stream(deltas).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("\"error\""));
    }
}
