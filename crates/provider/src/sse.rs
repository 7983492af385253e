use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Response;

/// Incremental server-sent-events framing over a byte stream. Frames are
/// separated by a blank line; `[DONE]` ends the logical stream.
pub fn parse_sse_stream(response: Response) -> BoxStream<'static, Result<SseEvent>> {
    let byte_stream = response.bytes_stream();
    let buffer = String::new();

    let stream = futures::stream::unfold(
        (byte_stream, buffer),
        |(mut byte_stream, mut buffer)| async move {
            loop {
                // Servers frame with either LF or CRLF blank lines.
                let boundary = ["\r\n\r\n", "\n\n"]
                    .iter()
                    .filter_map(|sep| buffer.find(sep).map(|pos| (pos, sep.len())))
                    .min();
                if let Some((pos, sep_len)) = boundary {
                    let event_text = buffer[..pos].to_string();
                    buffer = buffer[pos + sep_len..].to_string();

                    if let Some(event) = parse_event(&event_text) {
                        return Some((Ok(event), (byte_stream, buffer)));
                    }
                    continue;
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(crate::ProviderError::Stream(e.to_string()).into()),
                            (byte_stream, buffer),
                        ));
                    }
                    None => return None,
                }
            }
        },
    );

    Box::pin(stream)
}

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

fn parse_event(text: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        // The space after the field name is optional in the SSE grammar.
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    let data = data_lines.join("\n");
    if data == "[DONE]" {
        return None;
    }

    Some(SseEvent {
        event: event_type,
        data,
    })
}
