//! Typed decision payload returned by the oracle.
//!
//! The oracle answers with `{"thought": ..., "action": ..., "params": {...}}`.
//! The payload is parsed into [`ActionProposal`] once, at the boundary; the
//! rest of the crate never touches raw JSON.
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::{MarksmanError, MarksmanResult};
use crate::executor::actuator::ScrollDirection;

/// Element reference carried by `click` and `type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Expected visible text for `click`; the payload for `type`.
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(
        default,
        alias = "elementIndex",
        deserialize_with = "lenient_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub element_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressParams {
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollParams {
    #[serde(default)]
    pub direction: ScrollDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigateParams {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinishParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailParams {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProposedAction {
    Click(TargetParams),
    Type(TargetParams),
    Press(PressParams),
    Scroll(ScrollParams),
    Navigate(NavigateParams),
    Finish(FinishParams),
    Fail(FailParams),
}

impl ProposedAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Click(_) => "click",
            Self::Type(_) => "type",
            Self::Press(_) => "press",
            Self::Scroll(_) => "scroll",
            Self::Navigate(_) => "navigate",
            Self::Finish(_) => "finish",
            Self::Fail(_) => "fail",
        }
    }

    /// Parameters as recorded in the manifest.
    pub fn params_json(&self) -> Value {
        let value = match self {
            Self::Click(p) | Self::Type(p) => serde_json::to_value(p),
            Self::Press(p) => serde_json::to_value(p),
            Self::Scroll(p) => serde_json::to_value(p),
            Self::Navigate(p) => serde_json::to_value(p),
            Self::Finish(p) => serde_json::to_value(p),
            Self::Fail(p) => serde_json::to_value(p),
        };
        value.unwrap_or(Value::Null)
    }

    /// `(text, index)` pair used by the loop guard.
    pub fn text_param(&self) -> Option<&str> {
        match self {
            Self::Click(p) | Self::Type(p) => p.text.as_deref(),
            _ => None,
        }
    }

    pub fn index_param(&self) -> Option<i64> {
        match self {
            Self::Click(p) | Self::Type(p) => p.element_index,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionProposal {
    pub thought: String,
    pub action: ProposedAction,
}

impl ActionProposal {
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            thought: String::new(),
            action: ProposedAction::Fail(FailParams {
                reason: reason.into(),
            }),
        }
    }
}

#[derive(Deserialize)]
struct RawProposal {
    #[serde(default)]
    thought: String,
    action: String,
    #[serde(default)]
    params: Value,
}

/// Parse the oracle's reply. Accepts bare JSON or JSON wrapped in a Markdown
/// fence or surrounding prose.
pub fn parse_proposal(content: &str) -> MarksmanResult<ActionProposal> {
    let json = extract_json_object(content)
        .ok_or_else(|| MarksmanError::MalformedProposal(format!("no JSON object in reply: {}", preview(content))))?;
    let raw: RawProposal = serde_json::from_str(json)
        .map_err(|e| MarksmanError::MalformedProposal(format!("invalid proposal JSON: {e}")))?;

    let params = match raw.params {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };

    let action = match raw.action.trim().to_ascii_lowercase().as_str() {
        "click" => ProposedAction::Click(params_as(params)?),
        "type" => ProposedAction::Type(params_as(params)?),
        "press" => ProposedAction::Press(params_as(params)?),
        "scroll" => ProposedAction::Scroll(params_as(params)?),
        "navigate" => ProposedAction::Navigate(params_as(params)?),
        "finish" => ProposedAction::Finish(params_as(params)?),
        "fail" => ProposedAction::Fail(params_as(params)?),
        other => {
            return Err(MarksmanError::MalformedProposal(format!(
                "unknown action '{other}'"
            )))
        }
    };

    Ok(ActionProposal {
        thought: raw.thought,
        action,
    })
}

fn params_as<T: for<'de> Deserialize<'de>>(params: Value) -> MarksmanResult<T> {
    serde_json::from_value(params)
        .map_err(|e| MarksmanError::MalformedProposal(format!("invalid params: {e}")))
}

fn extract_json_object(content: &str) -> Option<&str> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").ok());

    let trimmed = content.trim();
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }
    if let Some(caps) = fence.as_ref().and_then(|re| re.captures(trimmed)) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn preview(content: &str) -> String {
    content.chars().take(120).collect()
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Integer, numeric string, or null. Anything else is treated as absent.
fn lenient_index<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_with_camel_case_index() {
        let p = parse_proposal(
            r#"{"thought":"open menu","action":"click","params":{"elementIndex":2,"text":"Create"}}"#,
        )
        .unwrap();
        assert_eq!(p.thought, "open menu");
        assert_eq!(
            p.action,
            ProposedAction::Click(TargetParams {
                selector: None,
                text: Some("Create".into()),
                element_index: Some(2),
            })
        );
    }

    #[test]
    fn index_accepts_strings_and_null() {
        let p = parse_proposal(r#"{"action":"type","params":{"element_index":"7","text":"hi"}}"#).unwrap();
        assert_eq!(p.action.index_param(), Some(7));

        let p = parse_proposal(r#"{"action":"type","params":{"element_index":null,"text":"hi"}}"#).unwrap();
        assert_eq!(p.action.index_param(), None);
        assert_eq!(p.action.text_param(), Some("hi"));
    }

    #[test]
    fn fenced_reply_is_extracted() {
        let reply = "Sure:\n```json\n{\"action\":\"press\",\"params\":{\"key\":\"Enter\"}}\n```";
        let p = parse_proposal(reply).unwrap();
        assert_eq!(p.action, ProposedAction::Press(PressParams { key: "Enter".into() }));
    }

    #[test]
    fn finish_without_params_and_scroll_defaults() {
        let p = parse_proposal(r#"{"action":"finish"}"#).unwrap();
        assert_eq!(p.action, ProposedAction::Finish(FinishParams { summary: None }));

        let p = parse_proposal(r#"{"action":"scroll","params":{}}"#).unwrap();
        assert_eq!(
            p.action,
            ProposedAction::Scroll(ScrollParams {
                direction: ScrollDirection::Down,
                amount: None
            })
        );
    }

    #[test]
    fn malformed_replies_are_typed_errors() {
        for reply in [
            "no json here",
            r#"{"action":"dance","params":{}}"#,
            r#"{"action":"navigate","params":{}}"#,
            r#"{"thought":"missing action"}"#,
        ] {
            let err = parse_proposal(reply).unwrap_err();
            assert!(matches!(err, MarksmanError::MalformedProposal(_)), "{reply}");
        }
    }

    #[test]
    fn params_json_omits_absent_fields() {
        let p = parse_proposal(r#"{"action":"click","params":{"text":"Save"}}"#).unwrap();
        assert_eq!(p.action.params_json(), serde_json::json!({"text": "Save"}));
    }
}
