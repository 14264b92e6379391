//! Deadline-bounded SSE payload decoder.
//!
//! The Sonar streaming endpoint emits full-snapshot JSON chunks prefixed
//! `data: `, so the latest well-formed payload is always the best one.
//! Deep-research and long-generation models can outrun typical request
//! timeouts; this decoder enforces a wall-clock deadline and treats expiry as
//! a soft stop, returning whatever snapshot was captured so far.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::time::Instant;

use crate::upstream::UpstreamError;

/// Event-data prefix on payload lines.
const DATA_PREFIX: &str = "data:";

/// Decode a server-sent-event byte stream into its final JSON payload.
///
/// Reads until end-of-stream or `deadline`, whichever comes first. Each
/// complete `data: `-prefixed line overwrites the last-valid-payload
/// accumulator; malformed lines are logged and skipped. On exit the held-back
/// tail is parsed as one final candidate if it looks like a complete object.
/// Fails with `EmptyStream` only when no payload was ever captured.
pub async fn decode_sse_payload<S>(
    byte_stream: S,
    deadline: Instant,
) -> Result<serde_json::Value, UpstreamError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    futures::pin_mut!(byte_stream);

    let mut buffer = String::new();
    let mut last_payload: Option<serde_json::Value> = None;

    loop {
        if Instant::now() >= deadline {
            tracing::warn!("Stream deadline reached, keeping last captured payload");
            break;
        }

        let chunk = match tokio::time::timeout_at(deadline, byte_stream.next()).await {
            Err(_) => {
                tracing::warn!("Stream deadline reached mid-read, cancelling");
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(err))) => {
                // A dropped connection after a snapshot was captured is
                // truncation, not failure.
                if last_payload.is_some() {
                    tracing::warn!(error = %err, "Stream read failed, keeping last captured payload");
                    break;
                }
                return Err(err.into());
            }
        };

        buffer.push_str(&String::from_utf8_lossy(&chunk));

        // Drain complete lines; the trailing partial line stays buffered.
        while let Some(newline_pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline_pos).collect();
            decode_data_line(line.trim_end_matches(['\n', '\r']), &mut last_payload);
        }
    }

    // The held-back tail may itself be a complete final event that simply
    // never got its trailing newline.
    let tail = buffer.trim();
    if let Some(data) = tail.strip_prefix(DATA_PREFIX) {
        let data = data.trim();
        if data.starts_with('{') && data.ends_with('}') {
            decode_data_line(tail, &mut last_payload);
        }
    }

    last_payload.ok_or(UpstreamError::EmptyStream)
}

/// Parse a single `data: `-prefixed line into the accumulator (last wins).
fn decode_data_line(line: &str, last_payload: &mut Option<serde_json::Value>) {
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return;
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return;
    }

    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => *last_payload = Some(value),
        Err(err) => {
            tracing::debug!(error = %err, "Skipping malformed SSE line");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use std::time::Duration;

    fn byte_stream(chunks: Vec<&str>) -> impl Stream<Item = Result<Bytes, reqwest::Error>> {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from(c.to_string())))
                .collect::<Vec<_>>(),
        )
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_last_snapshot_wins() {
        let input = byte_stream(vec![
            "data: {\"seq\": 1}\n",
            "data: {\"seq\": 2}\n",
            "data: {\"seq\": 3}\n\n",
        ]);
        let payload = decode_sse_payload(input, far_deadline()).await.unwrap();
        assert_eq!(payload, json!({"seq": 3}));
    }

    #[tokio::test]
    async fn test_decode_is_idempotent() {
        let make = || byte_stream(vec!["data: {\"answer\": \"42\"}\n\n"]);
        let first = decode_sse_payload(make(), far_deadline()).await.unwrap();
        let second = decode_sse_payload(make(), far_deadline()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let input = byte_stream(vec!["data: {\"se", "q\": 7}\n"]);
        let payload = decode_sse_payload(input, far_deadline()).await.unwrap();
        assert_eq!(payload, json!({"seq": 7}));
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let input = byte_stream(vec![
            "data: {\"seq\": 1}\n",
            "data: {not json at all\n",
            "data: [DONE]\n",
        ]);
        let payload = decode_sse_payload(input, far_deadline()).await.unwrap();
        assert_eq!(payload, json!({"seq": 1}));
    }

    #[tokio::test]
    async fn test_truncated_tail_is_not_a_candidate() {
        // The trailing line lost its closing brace mid-transmission; the
        // decoder must fall back to the last complete payload before it.
        let input = byte_stream(vec![
            "data: {\"seq\": 1}\n",
            "data: {\"seq\": 2, \"partial\": tru",
        ]);
        let payload = decode_sse_payload(input, far_deadline()).await.unwrap();
        assert_eq!(payload, json!({"seq": 1}));
    }

    #[tokio::test]
    async fn test_complete_tail_without_newline_is_final_candidate() {
        let input = byte_stream(vec!["data: {\"seq\": 1}\ndata: {\"seq\": 2}"]);
        let payload = decode_sse_payload(input, far_deadline()).await.unwrap();
        assert_eq!(payload, json!({"seq": 2}));
    }

    #[tokio::test]
    async fn test_empty_stream_errors() {
        let input = byte_stream(vec![]);
        let err = decode_sse_payload(input, far_deadline()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::EmptyStream));
    }

    #[tokio::test]
    async fn test_non_data_lines_ignored() {
        let input = byte_stream(vec![
            "event: message\n",
            "id: 17\n",
            ": keep-alive\n",
            "data: {\"seq\": 9}\n",
        ]);
        let payload = decode_sse_payload(input, far_deadline()).await.unwrap();
        assert_eq!(payload, json!({"seq": 9}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_last_payload() {
        // One payload arrives, then the stream hangs forever; the deadline
        // must cancel the read and hand back what was captured.
        let hanging = byte_stream(vec!["data: {\"seq\": 1}\n"]).chain(stream::pending());
        let deadline = Instant::now() + Duration::from_millis(100);
        let payload = decode_sse_payload(hanging, deadline).await.unwrap();
        assert_eq!(payload, json!({"seq": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_with_no_payload_is_empty_stream() {
        let hanging = byte_stream(vec![]).chain(stream::pending());
        let deadline = Instant::now() + Duration::from_millis(100);
        let err = decode_sse_payload(hanging, deadline).await.unwrap_err();
        assert!(matches!(err, UpstreamError::EmptyStream));
    }
}
