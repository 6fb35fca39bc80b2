use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

use crate::agent_engine::proposal::{parse_proposal, ActionProposal};
use crate::config::OracleConfig;
use crate::errors::{MarksmanError, MarksmanResult};
use crate::llm::prompt;
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::{CallConfig, ChatMessage, ContentPart, ImageUrl};
use crate::perception::types::FilteredElementSet;

/// Everything the oracle sees for one step.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub task: String,
    /// Annotated screenshot, PNG encoded.
    pub screenshot_png: Vec<u8>,
    /// Index-free descriptions of earlier actions.
    pub history: Vec<String>,
    pub elements: FilteredElementSet,
}

/// Decides the next action. Infallible: failures come back as a `fail`
/// proposal carrying the error text.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> ActionProposal;
}

/// Vision-model oracle over an OpenAI-compatible chat endpoint.
pub struct VisionOracle {
    provider: Arc<dyn LlmProvider>,
    call: CallConfig,
    element_cap: usize,
}

impl VisionOracle {
    pub fn new(provider: Arc<dyn LlmProvider>, cfg: &OracleConfig) -> Self {
        Self {
            provider,
            call: CallConfig {
                model: cfg.model.clone(),
                temperature: cfg.temperature,
                max_tokens: cfg.max_tokens,
                stream: cfg.stream,
                json_mode: cfg.json_mode,
            },
            element_cap: cfg.element_cap,
        }
    }

    /// Build the oracle from config with the given API key.
    pub fn from_config(cfg: &OracleConfig, api_key: String) -> MarksmanResult<Self> {
        let provider = OpenAiCompatibleProvider::new(
            "openai_compatible".into(),
            cfg.api_base.clone(),
            api_key,
            Duration::from_secs(cfg.request_timeout_secs),
        )?;
        Ok(Self::new(Arc::new(provider), cfg))
    }

    fn messages(&self, request: &DecisionRequest) -> Vec<ChatMessage> {
        let listed = &request.elements.as_slice()[..request.elements.len().min(self.element_cap)];
        let b64 = base64::engine::general_purpose::STANDARD.encode(&request.screenshot_png);
        vec![
            ChatMessage::system(prompt::SYSTEM_PROMPT),
            ChatMessage::user_parts(vec![
                ContentPart::Text {
                    text: prompt::user_text(&request.task, &request.history, listed),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/png;base64,{b64}"),
                        detail: Some("high".into()),
                    },
                },
            ]),
        ]
    }

    async fn try_decide(&self, request: &DecisionRequest) -> MarksmanResult<ActionProposal> {
        let resp = self.provider.chat(self.messages(request), &self.call).await?;
        if resp.content.trim().is_empty() {
            return Err(MarksmanError::Oracle("empty reply".into()));
        }
        parse_proposal(&resp.content)
    }
}

#[async_trait]
impl Oracle for VisionOracle {
    async fn decide(&self, request: &DecisionRequest) -> ActionProposal {
        match self.try_decide(request).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, provider = self.provider.name(), "oracle call failed");
                ActionProposal::fail(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::proposal::ProposedAction;
    use crate::llm::types::{LlmResponse, MessageContent};
    use std::sync::Mutex;

    struct Canned {
        reply: MarksmanResult<String>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl LlmProvider for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn chat(&self, messages: Vec<ChatMessage>, _cfg: &CallConfig) -> MarksmanResult<LlmResponse> {
            self.seen.lock().unwrap().push(messages);
            match &self.reply {
                Ok(s) => Ok(LlmResponse {
                    content: s.clone(),
                    reasoning: String::new(),
                }),
                Err(e) => Err(MarksmanError::Oracle(e.to_string())),
            }
        }
    }

    fn request() -> DecisionRequest {
        DecisionRequest {
            task: "open settings".into(),
            screenshot_png: vec![1, 2, 3],
            history: vec!["click on 'Menu'".into()],
            elements: FilteredElementSet::default(),
        }
    }

    #[tokio::test]
    async fn reply_is_parsed_and_image_attached() {
        let canned = Arc::new(Canned {
            reply: Ok(r#"{"thought":"t","action":"press","params":{"key":"Escape"}}"#.into()),
            seen: Mutex::new(Vec::new()),
        });
        let oracle = VisionOracle::new(canned.clone(), &OracleConfig::default());
        let p = oracle.decide(&request()).await;
        assert_eq!(p.action.kind(), "press");

        let seen = canned.seen.lock().unwrap();
        let MessageContent::Parts(parts) = &seen[0][1].content else {
            panic!("user message should have parts")
        };
        let ContentPart::ImageUrl { image_url } = &parts[1] else {
            panic!("second part should be the screenshot")
        };
        assert_eq!(image_url.url, "data:image/png;base64,AQID");
    }

    #[tokio::test]
    async fn provider_error_becomes_fail_proposal() {
        let canned = Arc::new(Canned {
            reply: Err(MarksmanError::Oracle("502 Bad Gateway".into())),
            seen: Mutex::new(Vec::new()),
        });
        let oracle = VisionOracle::new(canned, &OracleConfig::default());
        let p = oracle.decide(&request()).await;
        let ProposedAction::Fail(f) = p.action else {
            panic!("expected fail")
        };
        assert!(f.reason.contains("502"));
    }

    #[tokio::test]
    async fn unparseable_reply_becomes_fail_proposal() {
        let canned = Arc::new(Canned {
            reply: Ok("I think you should click the button".into()),
            seen: Mutex::new(Vec::new()),
        });
        let oracle = VisionOracle::new(canned, &OracleConfig::default());
        assert!(matches!(oracle.decide(&request()).await.action, ProposedAction::Fail(_)));
    }
}
