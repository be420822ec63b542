//! Bind-token redemption: a message whose text is a known token links the
//! sender's platform identity to the token's contact.

use tracing::{info, warn};

use {
    hermod_channels::{ChannelConfig, ChannelType, InboundMessage, SessionRecord},
    hermod_common::unix_now,
};

use crate::{replies, router::InboundRouter};

/// What became of an inbound text offered up for bind-token redemption.
pub(crate) enum BindOutcome {
    /// Not a known token; the pipeline continues with the message.
    Miss,
    /// The text matched a token and the message is consumed. The reply, when
    /// present, goes back to the sender; redemption without a reply target
    /// is abandoned silently.
    Handled(Option<&'static str>),
}

impl InboundRouter {
    /// Redeem the message text as a bind token if it names one.
    ///
    /// Every check failure gets its fixed reply text; redemption never turns
    /// into an error for the sender.
    pub(crate) async fn try_bind_token(
        &self,
        config: &ChannelConfig,
        message: &InboundMessage,
        session_id: &str,
    ) -> anyhow::Result<BindOutcome> {
        use BindOutcome::Handled;

        let text = message.text.trim();
        let Some(token) = self.contacts.get_bind_token(text).await? else {
            return Ok(BindOutcome::Miss);
        };

        // Nowhere to report the outcome: consume the token text untouched.
        if message.reply_target().is_none() {
            warn!(session_id, "bind token ignored: no reply target");
            return Ok(Handled(None));
        }

        let platform = message.channel.as_str();
        if token.bot_id != message.bot_id {
            return Ok(Handled(Some(replies::BIND_TOKEN_BOT_MISMATCH_REPLY)));
        }
        if token.is_used() {
            return Ok(Handled(Some(replies::BIND_TOKEN_USED_REPLY)));
        }
        if token.is_expired(unix_now()) {
            return Ok(Handled(Some(replies::BIND_TOKEN_EXPIRED_REPLY)));
        }
        if let Some(target) = token.target_platform.as_deref() {
            if !target.is_empty() && target != platform {
                return Ok(Handled(Some(replies::BIND_TOKEN_PLATFORM_MISMATCH_REPLY)));
            }
        }
        let Some(external_id) = message.sender_identity() else {
            return Ok(Handled(Some(replies::BIND_SENDER_UNKNOWN_REPLY)));
        };
        if let Some(target) = token.target_external_id.as_deref() {
            if !target.is_empty() && target != external_id {
                return Ok(Handled(Some(replies::BIND_TOKEN_TARGET_MISMATCH_REPLY)));
            }
        }

        let display_name = message.display_name().unwrap_or(external_id);
        if let Err(err) = self
            .contacts
            .upsert_channel(&token.contact_id, platform, external_id, display_name)
            .await
        {
            warn!(contact_id = %token.contact_id, error = %err, "channel identity link failed");
            return Ok(Handled(Some(replies::BIND_FAILED_REPLY)));
        }

        let mut bound_user = None;
        if let Some(user_id) = token.issued_by_user_id.as_deref().filter(|v| !v.is_empty()) {
            if let Err(err) = self.contacts.bind_user(&token.contact_id, user_id).await {
                warn!(contact_id = %token.contact_id, error = %err, "user attach failed");
                return Ok(Handled(Some(replies::BIND_CONTACT_TAKEN_REPLY)));
            }
            bound_user = Some(user_id.to_string());

            if let Some(payload) = sender_binding_payload(message) {
                if let Err(err) = self
                    .store
                    .upsert_user_binding(user_id, message.channel, payload)
                    .await
                {
                    // The identity link already stands; the binding will be
                    // re-derived from the next inbound message.
                    warn!(user_id, error = %err, "user channel binding persist failed");
                }
            }
        }

        let record = SessionRecord {
            session_id: session_id.to_string(),
            bot_id: message.bot_id.clone(),
            channel_config_id: (!message.channel.is_local()).then(|| config.id.clone()),
            user_id: bound_user,
            contact_id: Some(token.contact_id.clone()),
            platform: platform.to_string(),
        };
        if let Err(err) = self.store.upsert_session(&record).await {
            warn!(session_id, error = %err, "session persist failed");
        }

        match self.contacts.consume_bind_token(&token.token).await {
            Ok(true) => {
                info!(contact_id = %token.contact_id, platform, "bind token redeemed");
                Ok(Handled(Some(replies::BIND_SUCCESS_REPLY)))
            }
            Ok(false) => Ok(Handled(Some(replies::BIND_TOKEN_USED_REPLY))),
            Err(err) => {
                // The links are already persisted; report success and let
                // the token record catch up.
                warn!(error = %err, "bind token consume failed");
                Ok(Handled(Some(replies::BIND_SUCCESS_REPLY)))
            }
        }
    }
}

/// The sender's platform identity fields as a binding payload, in the shape
/// the per-platform binding schema expects. Only fields the message actually
/// carries are included; a payload with none of them is `None` and nothing
/// gets persisted.
pub(crate) fn sender_binding_payload(message: &InboundMessage) -> Option<serde_json::Value> {
    let mut fields = serde_json::Map::new();
    {
        let mut put = |key: &str, value: Option<&str>| {
            if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
                fields.insert(key.to_string(), serde_json::Value::String(v.to_string()));
            }
        };
        match message.channel {
            ChannelType::Telegram => {
                put("username", message.username.as_deref());
                put("user_id", message.user_id.as_deref());
                put("chat_id", Some(message.chat_id.as_str()));
            }
            ChannelType::Feishu => {
                put("open_id", message.open_id.as_deref());
                put("user_id", message.user_id.as_deref());
            }
            ChannelType::Cli | ChannelType::Web => return None,
        }
    }
    (!fields.is_empty()).then(|| serde_json::Value::Object(fields))
}

#[cfg(test)]
mod tests {
    use {hermod_channels::InboundMessage, serde_json::json};

    use super::*;

    fn message(channel: ChannelType) -> InboundMessage {
        InboundMessage {
            channel,
            text: String::new(),
            username: None,
            user_id: None,
            open_id: None,
            chat_id: String::new(),
            chat_type: None,
            reply_to: None,
            bot_id: "bot-1".to_string(),
            session_key: None,
        }
    }

    #[test]
    fn payload_keeps_only_present_fields() {
        let mut msg = message(ChannelType::Telegram);
        msg.username = Some(" alice ".to_string());
        msg.chat_id = "c1".to_string();
        let payload = sender_binding_payload(&msg).unwrap();
        assert_eq!(payload, json!({"username": "alice", "chat_id": "c1"}));
    }

    #[test]
    fn payload_without_platform_fields_is_none() {
        // A feishu sender known only by username has nothing to bind on.
        let mut msg = message(ChannelType::Feishu);
        msg.username = Some("alice".to_string());
        msg.chat_id = "c1".to_string();
        assert!(sender_binding_payload(&msg).is_none());
    }

    #[test]
    fn local_channels_have_no_payload() {
        let mut msg = message(ChannelType::Cli);
        msg.user_id = Some("u1".to_string());
        assert!(sender_binding_payload(&msg).is_none());
    }
}
