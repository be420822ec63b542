use std::sync::Arc;

use {
    async_trait::async_trait,
    tracing::{debug, warn},
};

use {
    hermod_auth::{self as auth, SessionIdentity, DEFAULT_ASSERTION_TTL_SECS},
    hermod_channels::{
        ChannelConfig, ChannelSession, ConfigStore, InboundMessage, InboundProcessor,
        OutboundMessage, SessionRecord,
    },
    hermod_chat::{extract_assistant_reply, ChatGateway, ChatRequest, ToolContext},
    hermod_identity::{BotSettings, ContactService, CreateContactRequest, SettingsService},
};

use crate::{bind::BindOutcome, replies};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A reply is due but the inbound message carries no reply target.
    #[error("inbound message has no reply target")]
    MissingReplyTarget,
}

/// The inbound routing pipeline.
///
/// One invocation per message, sequential inside: derive the session, try
/// the bind-token short-circuit, resolve user and contact, persist the
/// session, mint assertions, call the backend, and extract a reply.
pub struct InboundRouter {
    pub(crate) store: Arc<dyn ConfigStore>,
    pub(crate) contacts: Arc<dyn ContactService>,
    backend: Arc<dyn ChatGateway>,
    settings: Option<Arc<dyn SettingsService>>,
    signing_secret: Option<String>,
    assertion_ttl_secs: i64,
}

impl InboundRouter {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        contacts: Arc<dyn ContactService>,
        backend: Arc<dyn ChatGateway>,
    ) -> Self {
        Self {
            store,
            contacts,
            backend,
            settings: None,
            signing_secret: None,
            assertion_ttl_secs: DEFAULT_ASSERTION_TTL_SECS,
        }
    }

    /// Attach per-bot policy lookup. Without it every bot gets the default
    /// policy (guests disallowed).
    #[must_use]
    pub fn with_settings(mut self, settings: Arc<dyn SettingsService>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Enable assertion minting. Without a secret the backend is called
    /// with no token.
    #[must_use]
    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_assertion_ttl(mut self, ttl_secs: i64) -> Self {
        self.assertion_ttl_secs = ttl_secs;
        self
    }

    async fn process(
        &self,
        config: &ChannelConfig,
        mut message: InboundMessage,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        if message.text.trim().is_empty() {
            return Ok(None);
        }
        // Adapters may omit the bot id; the config it arrived under fills it.
        if message.bot_id.trim().is_empty() {
            message.bot_id = config.bot_id.clone();
        }
        let text = message.text.trim();

        let session_id = message.session_id();
        let platform = message.channel.as_str();
        let channel_config_id = (!message.channel.is_local()).then(|| config.id.clone());

        // A failed session lookup leaves the identity unresolved rather
        // than dropping the message.
        let session: Option<ChannelSession> = match self.store.get_session(&session_id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(%session_id, error = %err, "session lookup failed");
                None
            }
        };
        let mut user_id = session.as_ref().and_then(|s| s.user_id.clone());
        let mut contact_id = session.as_ref().and_then(|s| s.contact_id.clone());

        if let BindOutcome::Handled(reply) = self
            .try_bind_token(config, &message, &session_id)
            .await?
        {
            return match reply {
                Some(text) => reply_to(&message, text.to_string()).map(Some),
                None => Ok(None),
            };
        }

        if user_id.is_none() {
            user_id = self
                .store
                .resolve_user_by_binding(message.channel, &message.binding_criteria())
                .await?;
            if let Some(user_id) = &user_id {
                debug!(%session_id, %user_id, "user resolved from channel binding");
                // Persist the session-user link right away; later failures in
                // contact resolution must not lose it.
                let record = SessionRecord {
                    session_id: session_id.clone(),
                    bot_id: message.bot_id.clone(),
                    channel_config_id: channel_config_id.clone(),
                    user_id: Some(user_id.clone()),
                    contact_id: contact_id.clone(),
                    platform: platform.to_string(),
                };
                if let Err(err) = self.store.upsert_session(&record).await {
                    warn!(%session_id, error = %err, "session persist failed");
                }
            }
        }

        if contact_id.is_none() {
            contact_id = self.resolve_contact(&message, user_id.as_deref()).await?;
        }

        let Some(contact_id) = contact_id else {
            return reply_to(&message, replies::UNBOUND_REPLY.to_string()).map(Some);
        };

        let record = SessionRecord {
            session_id: session_id.clone(),
            bot_id: message.bot_id.clone(),
            channel_config_id,
            user_id: user_id.clone(),
            contact_id: Some(contact_id.clone()),
            platform: platform.to_string(),
        };
        self.store.upsert_session(&record).await?;

        let (session_token, user_token) = self.mint_assertions(
            &message,
            &session_id,
            &contact_id,
            user_id.as_deref(),
        );

        let contact_name = match self.contacts.get_by_id(&contact_id).await {
            Ok(contact) => contact.map(|c| c.display_name).filter(|n| !n.is_empty()),
            Err(err) => {
                warn!(%contact_id, error = %err, "contact lookup failed");
                None
            }
        };

        let request = ChatRequest {
            bot_id: message.bot_id.clone(),
            session_id: session_id.clone(),
            token: user_token.map(|t| format!("Bearer {t}")).unwrap_or_default(),
            user_id: user_id.clone().unwrap_or_default(),
            query: text.to_string(),
            platforms: vec![platform.to_string()],
            current_platform: Some(platform.to_string()),
            tool_context: Some(ToolContext {
                bot_id: Some(message.bot_id.clone()),
                session_id: Some(session_id.clone()),
                current_platform: Some(platform.to_string()),
                reply_target: message.reply_target().map(str::to_string),
                session_token,
                contact_id: Some(contact_id.clone()),
                contact_name,
            }),
        };
        let response = self.backend.chat(&request).await?;

        match extract_assistant_reply(&response) {
            Some(reply) => reply_to(&message, reply).map(Some),
            None => Ok(None),
        }
    }

    /// Steps 6-8 of resolution: contact by user, by external identity,
    /// then the guest branch. `Ok(None)` means the sender stays unbound.
    async fn resolve_contact(
        &self,
        message: &InboundMessage,
        user_id: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        let platform = message.channel.as_str();
        let external_id = message.sender_identity();

        if let Some(user_id) = user_id {
            if let Some(contact) = self.contacts.get_by_user_id(&message.bot_id, user_id).await? {
                return Ok(Some(contact.id));
            }
            let contact = self
                .contacts
                .create(&CreateContactRequest {
                    bot_id: message.bot_id.clone(),
                    user_id: Some(user_id.to_string()),
                    display_name: message.display_name().unwrap_or(user_id).to_string(),
                    is_guest: false,
                })
                .await?;
            self.link_channel(&contact.id, platform, external_id, message)
                .await;
            return Ok(Some(contact.id));
        }

        if let Some(external_id) = external_id {
            if let Some(channel) = self
                .contacts
                .get_by_channel_identity(&message.bot_id, platform, external_id)
                .await?
            {
                return Ok(Some(channel.contact_id));
            }
        }

        if !self.bot_settings(&message.bot_id).await.allow_guest {
            return Ok(None);
        }
        let display_name = message.display_name().unwrap_or("guest");
        let guest = self
            .contacts
            .create_guest(&message.bot_id, display_name)
            .await?;
        self.link_channel(&guest.id, platform, external_id, message)
            .await;
        Ok(Some(guest.id))
    }

    async fn link_channel(
        &self,
        contact_id: &str,
        platform: &str,
        external_id: Option<&str>,
        message: &InboundMessage,
    ) {
        let Some(external_id) = external_id else { return };
        let display_name = message.display_name().unwrap_or(external_id);
        if let Err(err) = self
            .contacts
            .upsert_channel(contact_id, platform, external_id, display_name)
            .await
        {
            warn!(contact_id, platform, error = %err, "channel identity link failed");
        }
    }

    async fn bot_settings(&self, bot_id: &str) -> BotSettings {
        let Some(settings) = &self.settings else {
            return BotSettings::default();
        };
        match settings.bot_settings(bot_id).await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(bot_id, error = %err, "settings lookup failed; using defaults");
                BotSettings::default()
            }
        }
    }

    /// Mint the session and user assertions. Failures downgrade to "no
    /// token" so a misconfigured secret never drops messages.
    fn mint_assertions(
        &self,
        message: &InboundMessage,
        session_id: &str,
        contact_id: &str,
        user_id: Option<&str>,
    ) -> (Option<String>, Option<String>) {
        let Some(secret) = self.signing_secret.as_deref() else {
            return (None, None);
        };

        let identity = SessionIdentity {
            bot_id: message.bot_id.clone(),
            platform: message.channel.as_str().to_string(),
            reply_target: message.reply_target().unwrap_or_default().to_string(),
            session_id: session_id.to_string(),
            contact_id: Some(contact_id.to_string()),
        };
        let session_token = match auth::mint_session_assertion(
            secret,
            &identity,
            self.assertion_ttl_secs,
        ) {
            Ok(assertion) => Some(assertion.token),
            Err(err) => {
                warn!(session_id, error = %err, "session assertion mint failed");
                None
            }
        };

        let user_token = user_id.and_then(|user_id| {
            match auth::mint_user_assertion(secret, user_id, self.assertion_ttl_secs) {
                Ok(assertion) => Some(assertion.token),
                Err(err) => {
                    warn!(user_id, error = %err, "user assertion mint failed");
                    None
                }
            }
        });

        (session_token, user_token)
    }
}

#[async_trait]
impl InboundProcessor for InboundRouter {
    async fn handle_inbound(
        &self,
        config: &ChannelConfig,
        message: InboundMessage,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        self.process(config, message).await
    }
}

fn reply_to(message: &InboundMessage, text: String) -> anyhow::Result<OutboundMessage> {
    let Some(target) = message.reply_target() else {
        return Err(Error::MissingReplyTarget.into());
    };
    Ok(OutboundMessage {
        to: target.to_string(),
        text,
    })
}
