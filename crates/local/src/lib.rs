//! Local channel surfaces: CLI and embedded Web.
//!
//! These channels have no external transport. Outbound messages go to the
//! in-process [`SessionHub`], where a terminal loop or a web socket layer
//! subscribes to its session; inbound messages are built here and fed
//! through the supervisor's handler chain.

pub mod error;

use std::sync::Arc;

use {async_trait::async_trait, tokio_util::sync::CancellationToken, tracing::error};

use hermod_channels::{
    AdapterRunner, ChannelAdapter, ChannelConfig, ChannelType, InboundHandler, InboundMessage,
    OutboundMessage, SessionHub,
};

use crate::error::{Context, Error, Result};

/// Adapter for a channel whose transport is the in-process hub.
///
/// `start` is a formality: there is no connection to open, and the runner
/// is unstoppable because the hub lives for the whole process. `send`
/// publishes to the target session's subscribers.
pub struct LocalAdapter {
    channel: ChannelType,
    hub: SessionHub,
}

impl LocalAdapter {
    pub fn cli(hub: SessionHub) -> Self {
        Self {
            channel: ChannelType::Cli,
            hub,
        }
    }

    pub fn web(hub: SessionHub) -> Self {
        Self {
            channel: ChannelType::Web,
            hub,
        }
    }

    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }
}

#[async_trait]
impl ChannelAdapter for LocalAdapter {
    fn channel_type(&self) -> ChannelType {
        self.channel
    }

    async fn start(
        &self,
        _shutdown: CancellationToken,
        _config: &ChannelConfig,
        _handler: InboundHandler,
    ) -> anyhow::Result<AdapterRunner> {
        Ok(AdapterRunner::unstoppable())
    }

    async fn send(&self, _config: &ChannelConfig, message: &OutboundMessage) -> anyhow::Result<()> {
        if message.to.trim().is_empty() {
            return Err(Error::MissingTarget.into());
        }
        if message.text.trim().is_empty() {
            return Err(Error::EmptyMessage.into());
        }
        self.hub.publish(message.to.trim(), message);
        Ok(())
    }
}

/// The session key a local surface talks under: one session per
/// (channel, bot).
pub fn session_key(channel: ChannelType, bot_id: &str) -> String {
    format!("{}:{}", channel, bot_id.trim())
}

/// Build the inbound envelope for text typed into a local surface.
///
/// The reply target is the session key itself, so replies come back through
/// the hub to whoever is subscribed.
pub fn inbound_message(
    channel: ChannelType,
    bot_id: &str,
    user_id: Option<&str>,
    text: &str,
) -> Result<InboundMessage> {
    if !channel.is_local() {
        return Err(Error::Message(format!("{channel} is not a local channel")));
    }
    let bot_id = {
        let trimmed = bot_id.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
    .context("bot id is required")?;

    let key = session_key(channel, bot_id);
    Ok(InboundMessage {
        channel,
        text: text.to_string(),
        username: None,
        user_id: user_id.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string),
        open_id: None,
        chat_id: bot_id.to_string(),
        chat_type: None,
        reply_to: Some(key.clone()),
        bot_id: bot_id.to_string(),
        session_key: Some(key),
    })
}

/// Hand one inbound message to the handler chain on its own task, so a slow
/// pipeline never blocks the surface's input loop.
pub fn dispatch(handler: &InboundHandler, config: ChannelConfig, message: InboundMessage) {
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        let channel = message.channel;
        if let Err(err) = handler(config, message).await {
            error!(channel = %channel, error = %err, "inbound handling failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use {super::*, std::sync::atomic::{AtomicUsize, Ordering}};

    #[tokio::test]
    async fn send_publishes_to_the_session() {
        let hub = SessionHub::new();
        let adapter = LocalAdapter::cli(hub.clone());
        let config = ChannelConfig::local(ChannelType::Cli, "bot-1");
        let mut stream = hub.subscribe("cli:bot-1");

        adapter
            .send(
                &config,
                &OutboundMessage {
                    to: "cli:bot-1".into(),
                    text: "hello".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(stream.recv().await.map(|m| m.text), Some("hello".into()));
    }

    #[tokio::test]
    async fn send_rejects_blank_target_and_text() {
        let hub = SessionHub::new();
        let adapter = LocalAdapter::web(hub);
        let config = ChannelConfig::local(ChannelType::Web, "bot-1");

        let err = adapter
            .send(&config, &OutboundMessage { to: " ".into(), text: "x".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("target"));

        let err = adapter
            .send(&config, &OutboundMessage { to: "web:bot-1".into(), text: "".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("text"));
    }

    #[test]
    fn inbound_messages_carry_the_session_key() {
        let msg = inbound_message(ChannelType::Cli, " bot-1 ", Some("u1"), "hi").unwrap();
        assert_eq!(msg.session_id(), "cli:bot-1");
        assert_eq!(msg.reply_target(), Some("cli:bot-1"));
        assert_eq!(msg.user_id.as_deref(), Some("u1"));
        assert_eq!(msg.bot_id, "bot-1");

        assert!(inbound_message(ChannelType::Cli, "  ", None, "hi").is_err());
        assert!(inbound_message(ChannelType::Telegram, "bot-1", None, "hi").is_err());
    }

    #[tokio::test]
    async fn dispatch_runs_the_handler_off_the_calling_task() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let done_tx = std::sync::Mutex::new(Some(done_tx));
        let seen = Arc::clone(&calls);
        let handler: InboundHandler = Arc::new(move |_cfg, _msg| {
            let seen = Arc::clone(&seen);
            let done = done_tx.lock().unwrap().take();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if let Some(done) = done {
                    let _ = done.send(());
                }
                Ok(())
            })
        });

        let config = ChannelConfig::local(ChannelType::Cli, "bot-1");
        let message = inbound_message(ChannelType::Cli, "bot-1", None, "hi").unwrap();
        dispatch(&handler, config, message);

        done_rx.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
