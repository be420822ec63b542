//! The conversational backend seam: the request/response envelope the
//! routing pipeline exchanges with whatever actually answers messages, and
//! the extraction of a sendable reply from a backend transcript.

use {anyhow::Result, async_trait::async_trait, serde::{Deserialize, Serialize}};

/// Session context forwarded to backend tools: where the conversation is
/// happening and who the resolved contact is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_target: Option<String>,
    /// Signed session assertion, when minting is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
}

/// One turn handed to the backend.
///
/// The identity fields are resolved by the pipeline and travel out of band
/// of the serialized body; a remote gateway puts the bearer token in a
/// header, not the payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(skip)]
    pub bot_id: String,
    #[serde(skip)]
    pub session_id: String,
    /// `Bearer`-prefixed user assertion; empty for guests or when no
    /// signing secret is configured.
    #[serde(skip)]
    pub token: String,
    /// Resolved account id; empty when only a contact is known.
    #[serde(skip)]
    pub user_id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_platform: Option<String>,
    #[serde(
        default,
        rename = "toolContext",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_context: Option<ToolContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// One transcript entry. `content` is either a plain string or an array of
/// typed parts, depending on the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

/// Whatever answers messages: a local engine or a remote service.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// The text to send back to the platform: the last assistant message with
/// non-empty content. Tool-call-only entries are skipped; an entry with an
/// empty role counts as assistant.
pub fn extract_assistant_reply(response: &ChatResponse) -> Option<String> {
    response
        .messages
        .iter()
        .rev()
        .filter(|m| m.role.is_empty() || m.role == "assistant")
        .find_map(|m| message_text(m).filter(|t| !t.trim().is_empty()))
}

fn message_text(message: &ChatMessage) -> Option<String> {
    match message.content.as_ref()? {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| {
                    part.get("text")
                        .and_then(serde_json::Value::as_str)
                        .filter(|t| !t.trim().is_empty())
                })
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn msg(role: &str, content: serde_json::Value) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
        }
    }

    #[test]
    fn last_non_empty_assistant_message_wins() {
        let response = ChatResponse {
            messages: vec![
                msg("assistant", json!("first")),
                msg("user", json!("question")),
                msg("assistant", json!("second")),
            ],
        };
        assert_eq!(extract_assistant_reply(&response), Some("second".into()));
    }

    #[test]
    fn tool_call_entries_without_content_are_skipped() {
        let response = ChatResponse {
            messages: vec![
                msg("assistant", json!("the answer")),
                ChatMessage {
                    role: "assistant".into(),
                    content: None,
                    tool_calls: Some(json!([{"name": "lookup"}])),
                },
            ],
        };
        assert_eq!(
            extract_assistant_reply(&response),
            Some("the answer".into())
        );
    }

    #[test]
    fn part_arrays_join_their_text_fields() {
        let response = ChatResponse {
            messages: vec![msg(
                "assistant",
                json!([
                    {"type": "text", "text": "line one"},
                    {"type": "image", "url": "ignored"},
                    {"type": "text", "text": "line two"},
                ]),
            )],
        };
        assert_eq!(
            extract_assistant_reply(&response),
            Some("line one\nline two".into())
        );
    }

    #[test]
    fn empty_role_counts_as_assistant() {
        let response = ChatResponse {
            messages: vec![msg("", json!("hello"))],
        };
        assert_eq!(extract_assistant_reply(&response), Some("hello".into()));
    }

    #[test]
    fn whitespace_only_replies_are_ignored() {
        let response = ChatResponse {
            messages: vec![msg("assistant", json!("  \n "))],
        };
        assert_eq!(extract_assistant_reply(&response), None);
    }

    #[test]
    fn request_body_hides_identity_fields() {
        let request = ChatRequest {
            bot_id: "bot-1".into(),
            session_id: "s1".into(),
            token: "Bearer secret".into(),
            user_id: "u1".into(),
            query: "hi".into(),
            platforms: vec!["telegram".into()],
            current_platform: Some("telegram".into()),
            tool_context: Some(ToolContext {
                contact_id: Some("c1".into()),
                current_platform: Some("telegram".into()),
                ..Default::default()
            }),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "query": "hi",
                "platforms": ["telegram"],
                "current_platform": "telegram",
                "toolContext": {"contactId": "c1", "currentPlatform": "telegram"},
            })
        );
    }
}
