use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Supported chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Telegram,
    Feishu,
    Cli,
    Web,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Feishu => "feishu",
            Self::Cli => "cli",
            Self::Web => "web",
        }
    }

    /// Local channels have no external transport and no persisted
    /// per-bot configuration; their sessions carry no config id.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Cli | Self::Web)
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(Self::Telegram),
            "feishu" => Ok(Self::Feishu),
            "cli" => Ok(Self::Cli),
            "web" => Ok(Self::Web),
            other => Err(Error::unsupported_channel(other)),
        }
    }
}

/// One platform connection's stored configuration for one bot.
///
/// Written by configuration management; read-only here. `updated_at` doubles
/// as the change-detection fingerprint during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub bot_id: String,
    pub channel_type: ChannelType,
    /// Opaque credential payload; decode with [`crate::config`] helpers.
    #[serde(default)]
    pub credentials: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_identity: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<i64>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl ChannelConfig {
    /// Ephemeral config for channels that are never persisted (CLI/Web).
    pub fn local(channel_type: ChannelType, bot_id: &str) -> Self {
        Self {
            id: format!("{}:{}", channel_type, bot_id.trim()),
            bot_id: bot_id.trim().to_string(),
            channel_type,
            credentials: serde_json::Value::Null,
            external_identity: None,
            status: String::new(),
            verified_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }
}

/// An authenticated user's platform identity binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelUserBinding {
    pub id: String,
    pub user_id: String,
    pub channel_type: ChannelType,
    /// Normalized binding payload; decode with [`crate::config`] helpers.
    pub config: serde_json::Value,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Persisted mapping from a session id to the identity resolved for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSession {
    pub session_id: String,
    pub bot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_config_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    pub platform: String,
}

/// Upsert payload for [`crate::store::ConfigStore::upsert_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    pub session_id: String,
    pub bot_id: String,
    pub channel_config_id: Option<String>,
    pub user_id: Option<String>,
    pub contact_id: Option<String>,
    pub platform: String,
}

/// Lookup criteria for resolving a user from platform sender fields.
///
/// Stores match platform-specifically, first match wins: telegram compares
/// chat id, then user id, then username (case-insensitive); feishu compares
/// open id, then user id. See [`crate::config`] for the matching helpers.
#[derive(Debug, Clone, Default)]
pub struct BindingCriteria {
    pub username: Option<String>,
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
    pub open_id: Option<String>,
}

/// Outbound request addressed either to an explicit target or to a user
/// whose binding the store can resolve.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub to_user_id: Option<String>,
    pub message: String,
}

/// One message headed back out to a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub text: String,
}

/// Normalized envelope for one received message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: ChannelType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_id: Option<String>,
    #[serde(default)]
    pub chat_id: String,
    /// Platform chat kind; empty, "p2p" and "private" mean a direct chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
    /// Opaque reply target the adapter understands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub bot_id: String,
    /// Explicit session key override (local channels set this).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

impl InboundMessage {
    /// Session id for this message: the explicit session key if set,
    /// otherwise derived from platform, bot, chat and sender fields.
    pub fn session_id(&self) -> String {
        if let Some(key) = non_empty(&self.session_key) {
            return key.to_string();
        }
        derive_session_id(
            self.channel.as_str(),
            &self.bot_id,
            &self.chat_id,
            self.chat_type.as_deref().unwrap_or(""),
            self.open_id.as_deref().unwrap_or(""),
            self.user_id.as_deref().unwrap_or(""),
            self.username.as_deref().unwrap_or(""),
        )
    }

    /// The sender's external identity on the platform, preferring the most
    /// stable field available.
    pub fn sender_identity(&self) -> Option<&str> {
        non_empty(&self.open_id)
            .or_else(|| non_empty(&self.user_id))
            .or_else(|| non_empty(&self.username))
            .or_else(|| trimmed_non_empty(&self.chat_id))
    }

    /// Best human-readable name for the sender.
    pub fn display_name(&self) -> Option<&str> {
        non_empty(&self.username)
            .or_else(|| non_empty(&self.user_id))
            .or_else(|| non_empty(&self.open_id))
            .or_else(|| trimmed_non_empty(&self.chat_id))
    }

    /// Trimmed reply target, if any.
    pub fn reply_target(&self) -> Option<&str> {
        non_empty(&self.reply_to)
    }

    pub fn binding_criteria(&self) -> BindingCriteria {
        BindingCriteria {
            username: self.username.clone(),
            user_id: self.user_id.clone(),
            chat_id: trimmed_non_empty(&self.chat_id).map(str::to_string),
            open_id: self.open_id.clone(),
        }
    }
}

/// Derive the session id `platform:bot_id:chat_id[:sender]`.
///
/// Pure function of its inputs. The sender suffix is appended only for chat
/// types outside the direct-chat set, so a private conversation is keyed by
/// chat alone while a group conversation gets one session per sender. The
/// suffix prefers open id over user id over username: the most stable
/// *personal* identifier wins here, unlike delivery-target derivation which
/// prefers whatever an outbound API call can post to.
pub fn derive_session_id(
    platform: &str,
    bot_id: &str,
    chat_id: &str,
    chat_type: &str,
    open_id: &str,
    user_id: &str,
    username: &str,
) -> String {
    let mut parts = vec![platform, bot_id, chat_id];
    let kind = chat_type.trim().to_ascii_lowercase();
    if !kind.is_empty() && kind != "p2p" && kind != "private" {
        let sender = [open_id, user_id, username]
            .into_iter()
            .map(str::trim)
            .find(|v| !v.is_empty());
        if let Some(sender) = sender {
            parts.push(sender);
        }
    }
    parts.join(":")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().and_then(|v| {
        let v = v.trim();
        (!v.is_empty()).then_some(v)
    })
}

fn trimmed_non_empty(value: &str) -> Option<&str> {
    let v = value.trim();
    (!v.is_empty()).then_some(v)
}
