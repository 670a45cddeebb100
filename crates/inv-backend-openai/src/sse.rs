// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server-sent-event line parsing for chat-completion streams.
//!
//! Works for OpenAI and OpenRouter-compatible endpoints: each event line is
//! `data: <json chunk>` and the stream terminates with `data: [DONE]`.

/// Outcome of parsing one SSE line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseLine {
    /// A text delta extracted from a chunk.
    Delta(String),
    /// The `[DONE]` terminator.
    Done,
    /// Comment, keep-alive, empty delta, or unparseable chunk.
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let Some(payload) = line.strip_prefix("data: ") else {
        return SseLine::Skip;
    };
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(chunk) = serde_json::from_str::<serde_json::Value>(payload) else {
        return SseLine::Skip;
    };
    match chunk
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
    {
        Some(delta) if !delta.is_empty() => SseLine::Delta(delta.to_string()),
        _ => SseLine::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_content_deltas() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Delta("Hel".to_string()));
    }

    #[test]
    fn done_terminator() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
    }

    #[test]
    fn skips_non_data_lines() {
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line("event: ping"), SseLine::Skip);
    }

    #[test]
    fn skips_empty_or_missing_deltas() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#),
            SseLine::Skip
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line("data: not json"), SseLine::Skip);
    }
}
