use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{MarksmanError, MarksmanResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunkKind};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, timeout: Duration) -> MarksmanResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            id,
            api_base,
            api_key,
            client,
        })
    }
}

/// Request body as sent, minus image payloads, for debug logging.
fn sanitized_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) != Some("image_url") {
                    continue;
                }
                if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                    *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

pub(crate) fn request_body(messages: &[ChatMessage], cfg: &CallConfig) -> MarksmanResult<serde_json::Value> {
    let mut body = serde_json::json!({
        "model": cfg.model,
        "messages": serde_json::to_value(messages)?,
        "stream": cfg.stream,
        "temperature": cfg.temperature,
        "max_tokens": cfg.max_tokens,
    });
    if cfg.json_mode {
        body["response_format"] = serde_json::json!({"type": "json_object"});
    }
    Ok(body)
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> MarksmanResult<LlmResponse> {
        let body = request_body(&messages, cfg)?;

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            "sending LLM request"
        );
        tracing::debug!(body = %sanitized_for_log(&body), "request body (sanitized, base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(MarksmanError::Oracle(format!("{status}: {err_body}")));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulate an SSE response into a single reply.
    async fn handle_stream(&self, response: reqwest::Response) -> MarksmanResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut line_buf = String::new();
        let mut resp = LlmResponse::default();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            let text = String::from_utf8_lossy(&bytes);

            for ch in text.chars() {
                if ch != '\n' {
                    line_buf.push(ch);
                    continue;
                }
                let line = line_buf.trim().to_string();
                line_buf.clear();
                if line.is_empty() {
                    continue;
                }

                match sse_parser::parse_sse_line(&line) {
                    Ok(Some(chunk)) => match chunk.kind {
                        StreamChunkKind::Reasoning => resp.reasoning.push_str(&chunk.content),
                        StreamChunkKind::Content => resp.content.push_str(&chunk.content),
                        StreamChunkKind::Done => break 'stream,
                    },
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!("SSE parse skipped: {e}");
                    }
                }
            }
        }

        tracing::info!(
            content_len = resp.content.len(),
            reasoning_len = resp.reasoning.len(),
            "LLM stream complete"
        );
        Ok(resp)
    }

    async fn handle_json(&self, response: reqwest::Response) -> MarksmanResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;

        let Some(content) = json["choices"][0]["message"]["content"].as_str() else {
            return Err(MarksmanError::Oracle(format!(
                "response has no message content: {}",
                json.to_string().chars().take(200).collect::<String>()
            )));
        };

        tracing::info!(content_len = content.len(), "LLM JSON response received");

        Ok(LlmResponse {
            content: content.to_string(),
            reasoning: String::new(),
        })
    }
}
