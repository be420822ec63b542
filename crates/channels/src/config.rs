//! Typed per-platform credential and binding payloads.
//!
//! Stored payloads are opaque JSON at rest. They are decoded exactly once at
//! this boundary into typed structs (tolerating both camelCase and
//! snake_case keys), validated, and re-serialized in canonical snake_case
//! form. Nothing downstream inspects raw maps.

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    types::{BindingCriteria, ChannelType},
};

/// Telegram bot credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramCredentials {
    #[serde(default, rename = "bot_token", alias = "botToken")]
    pub bot_token: String,
}

/// A user's telegram identity, as captured from an inbound message or an
/// explicit bind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(
        default,
        rename = "user_id",
        alias = "userId",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(
        default,
        rename = "chat_id",
        alias = "chatId",
        skip_serializing_if = "Option::is_none"
    )]
    pub chat_id: Option<String>,
}

/// Feishu app credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuCredentials {
    #[serde(default, rename = "app_id", alias = "appId")]
    pub app_id: String,
    #[serde(default, rename = "app_secret", alias = "appSecret")]
    pub app_secret: String,
    #[serde(
        default,
        rename = "encrypt_key",
        alias = "encryptKey",
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypt_key: Option<String>,
    #[serde(
        default,
        rename = "verification_token",
        alias = "verificationToken",
        skip_serializing_if = "Option::is_none"
    )]
    pub verification_token: Option<String>,
}

/// A user's feishu identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeishuBinding {
    #[serde(
        default,
        rename = "open_id",
        alias = "openId",
        skip_serializing_if = "Option::is_none"
    )]
    pub open_id: Option<String>,
    #[serde(
        default,
        rename = "user_id",
        alias = "userId",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
}

impl TelegramCredentials {
    pub fn parse(raw: &serde_json::Value) -> Result<Self> {
        let mut parsed: Self = decode(raw)?;
        parsed.bot_token = parsed.bot_token.trim().to_string();
        if parsed.bot_token.is_empty() {
            return Err(Error::invalid_config("telegram bot_token is required"));
        }
        Ok(parsed)
    }
}

impl TelegramBinding {
    pub fn parse(raw: &serde_json::Value) -> Result<Self> {
        let mut parsed: Self = decode(raw)?;
        parsed.username = trim_opt(parsed.username);
        parsed.user_id = trim_opt(parsed.user_id);
        parsed.chat_id = trim_opt(parsed.chat_id);
        if parsed.username.is_none() && parsed.user_id.is_none() && parsed.chat_id.is_none() {
            return Err(Error::invalid_config(
                "telegram binding requires username, user_id, or chat_id",
            ));
        }
        Ok(parsed)
    }

    /// Where an outbound telegram message for this user should be sent.
    ///
    /// Prefers chat id over user id over @username: the Bot API posts into
    /// a chat, so the strongest *deliverable* handle wins. This is
    /// intentionally not the session-suffix order in
    /// [`crate::types::derive_session_id`], which prefers the most stable
    /// personal identifier.
    pub fn delivery_target(&self) -> Result<String> {
        if let Some(chat_id) = &self.chat_id {
            return Ok(chat_id.clone());
        }
        if let Some(user_id) = &self.user_id {
            return Ok(user_id.clone());
        }
        if let Some(username) = &self.username {
            return Ok(if username.starts_with('@') {
                username.clone()
            } else {
                format!("@{username}")
            });
        }
        Err(Error::IncompleteBinding {
            channel: ChannelType::Telegram,
        })
    }

    pub fn matches(&self, criteria: &BindingCriteria) -> bool {
        if both_match(&criteria.chat_id, &self.chat_id, str::eq) {
            return true;
        }
        if both_match(&criteria.user_id, &self.user_id, str::eq) {
            return true;
        }
        both_match(&criteria.username, &self.username, |a, b| {
            a.eq_ignore_ascii_case(b)
        })
    }
}

impl FeishuCredentials {
    pub fn parse(raw: &serde_json::Value) -> Result<Self> {
        let mut parsed: Self = decode(raw)?;
        parsed.app_id = parsed.app_id.trim().to_string();
        parsed.app_secret = parsed.app_secret.trim().to_string();
        parsed.encrypt_key = trim_opt(parsed.encrypt_key);
        parsed.verification_token = trim_opt(parsed.verification_token);
        if parsed.app_id.is_empty() || parsed.app_secret.is_empty() {
            return Err(Error::invalid_config(
                "feishu app_id and app_secret are required",
            ));
        }
        Ok(parsed)
    }
}

impl FeishuBinding {
    pub fn parse(raw: &serde_json::Value) -> Result<Self> {
        let mut parsed: Self = decode(raw)?;
        parsed.open_id = trim_opt(parsed.open_id);
        parsed.user_id = trim_opt(parsed.user_id);
        if parsed.open_id.is_none() && parsed.user_id.is_none() {
            return Err(Error::invalid_config(
                "feishu binding requires open_id or user_id",
            ));
        }
        Ok(parsed)
    }

    /// Outbound feishu targets carry an id-type prefix the adapter passes
    /// through to the message API.
    pub fn delivery_target(&self) -> Result<String> {
        if let Some(open_id) = &self.open_id {
            return Ok(format!("open_id:{open_id}"));
        }
        if let Some(user_id) = &self.user_id {
            return Ok(format!("user_id:{user_id}"));
        }
        Err(Error::IncompleteBinding {
            channel: ChannelType::Feishu,
        })
    }

    pub fn matches(&self, criteria: &BindingCriteria) -> bool {
        if both_match(&criteria.open_id, &self.open_id, str::eq) {
            return true;
        }
        both_match(&criteria.user_id, &self.user_id, str::eq)
    }
}

/// Validate a stored credential payload and return its canonical form.
pub fn normalize_credentials(
    channel_type: ChannelType,
    raw: &serde_json::Value,
) -> Result<serde_json::Value> {
    match channel_type {
        ChannelType::Telegram => Ok(serde_json::to_value(TelegramCredentials::parse(raw)?)?),
        ChannelType::Feishu => Ok(serde_json::to_value(FeishuCredentials::parse(raw)?)?),
        ChannelType::Cli | ChannelType::Web => Ok(raw.clone()),
    }
}

/// Validate a user binding payload and return its canonical form.
pub fn normalize_binding(
    channel_type: ChannelType,
    raw: &serde_json::Value,
) -> Result<serde_json::Value> {
    match channel_type {
        ChannelType::Telegram => Ok(serde_json::to_value(TelegramBinding::parse(raw)?)?),
        ChannelType::Feishu => Ok(serde_json::to_value(FeishuBinding::parse(raw)?)?),
        ChannelType::Cli | ChannelType::Web => Ok(raw.clone()),
    }
}

/// Derive the delivery target for an outbound message from a stored user
/// binding payload.
pub fn resolve_delivery_target(
    channel_type: ChannelType,
    binding: &serde_json::Value,
) -> Result<String> {
    match channel_type {
        ChannelType::Telegram => TelegramBinding::parse(binding)?.delivery_target(),
        ChannelType::Feishu => FeishuBinding::parse(binding)?.delivery_target(),
        ChannelType::Cli | ChannelType::Web => {
            Err(Error::unsupported_channel(channel_type))
        }
    }
}

/// Does a stored binding payload match the sender of an inbound message?
pub fn binding_matches(
    channel_type: ChannelType,
    binding: &serde_json::Value,
    criteria: &BindingCriteria,
) -> bool {
    match channel_type {
        ChannelType::Telegram => TelegramBinding::parse(binding)
            .map(|b| b.matches(criteria))
            .unwrap_or(false),
        ChannelType::Feishu => FeishuBinding::parse(binding)
            .map(|b| b.matches(criteria))
            .unwrap_or(false),
        ChannelType::Cli | ChannelType::Web => false,
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: &serde_json::Value) -> Result<T> {
    let raw = if raw.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        raw.clone()
    };
    Ok(serde_json::from_value(raw)?)
}

fn trim_opt(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let v = v.trim();
        (!v.is_empty()).then(|| v.to_string())
    })
}

fn both_match(criteria: &Option<String>, stored: &Option<String>, eq: fn(&str, &str) -> bool) -> bool {
    match (criteria.as_deref(), stored.as_deref()) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => eq(a, b),
        _ => false,
    }
}
