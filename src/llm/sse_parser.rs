use crate::errors::{MarksmanError, MarksmanResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None if the line is a keep-alive or non-data line.
pub fn parse_sse_line(line: &str) -> MarksmanResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Done,
            content: String::new(),
        }));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| MarksmanError::SseParsing(e.to_string()))?;

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };
    let delta = &first["delta"];

    // Some models expose their reasoning separately.
    if let Some(reasoning) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Reasoning,
            content: reasoning.to_string(),
        }));
    }

    if let Some(content) = delta["content"].as_str().filter(|s| !s.is_empty()) {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Content,
            content: content.to_string(),
        }));
    }

    if first["finish_reason"].as_str().is_some() {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Done,
            content: String::new(),
        }));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_delta() {
        let chunk = parse_sse_line(r#"data: {"choices":[{"delta":{"content":"{\"action\""}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.kind, StreamChunkKind::Content);
        assert_eq!(chunk.content, "{\"action\"");
    }

    #[test]
    fn done_marker_and_finish_reason() {
        let done = parse_sse_line("data: [DONE]").unwrap().unwrap();
        assert_eq!(done.kind, StreamChunkKind::Done);

        let fin = parse_sse_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(fin.kind, StreamChunkKind::Done);
    }

    #[test]
    fn keep_alives_and_other_fields_are_skipped() {
        assert!(parse_sse_line(": ping").unwrap().is_none());
        assert!(parse_sse_line("event: message").unwrap().is_none());
        assert!(parse_sse_line(r#"data: {"choices":[]}"#).unwrap().is_none());
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        assert!(matches!(
            parse_sse_line("data: {oops"),
            Err(MarksmanError::SseParsing(_))
        ));
    }
}
