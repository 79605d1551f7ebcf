use anyhow::Result;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// Parse one server-sent-events line of an OpenAI-compatible completion stream.
///
/// `None` for blank lines, comments, `[DONE]` and role-only deltas.
pub fn parse_line(line: &str) -> Option<Result<String>> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk.choices.into_iter().next().and_then(|c| c.delta.content).unwrap_or_default();
            if content.is_empty() { None } else { Some(Ok(content)) }
        }
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse stream chunk: {e}"))),
    }
}

/// Convert a byte stream into a stream of complete, non-blank lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters split
/// across network chunks decode intact. A line that is not valid UTF-8 is
/// yielded as an error.
pub fn stream_lines<E: std::fmt::Display + Send + 'static>(
    byte_stream: impl Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    stream::unfold((Box::pin(byte_stream.fuse()), Vec::<u8>::new()), |(mut stream, mut buffer)| async move {
        loop {
            if let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).take(newline_pos).collect();
                match decode_line(line) {
                    Some(item) => return Some((item, (stream, buffer))),
                    None => continue,
                }
            }

            match stream.next().await {
                Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Some((Err(anyhow::anyhow!("Stream read error: {e}")), (stream, buffer))),
                None => {
                    let remaining = std::mem::take(&mut buffer);
                    return decode_line(remaining).map(|item| (item, (stream, buffer)));
                }
            }
        }
    })
}

/// `None` for blank lines.
fn decode_line(line: Vec<u8>) -> Option<Result<String>> {
    match String::from_utf8(line) {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(Ok(line)),
        Err(e) => Some(Err(anyhow::anyhow!("Stream line is not valid UTF-8: {e}"))),
    }
}

/// Content deltas from an SSE byte stream; parse failures are passed through as errors.
pub fn content_deltas<E: std::fmt::Display + Send + 'static>(
    byte_stream: impl Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    stream_lines(byte_stream).filter_map(|line| async move {
        match line {
            Ok(line) => parse_line(&line),
            Err(e) => Some(Err(e)),
        }
    })
}
