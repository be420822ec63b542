//! The contract every platform adapter implements, plus the handler and
//! middleware types the supervisor composes around inbound traffic.

use std::{future::Future, pin::Pin, sync::Arc};

use {async_trait::async_trait, tokio_util::sync::CancellationToken};

use crate::types::{ChannelConfig, ChannelType, InboundMessage, OutboundMessage};

/// Future returned by an inbound handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Handler invoked once per received message. Adapters call this from their
/// receive loops; the composed chain ends in the supervisor's dispatch.
pub type InboundHandler = Arc<dyn Fn(ChannelConfig, InboundMessage) -> HandlerFuture + Send + Sync>;

/// Handler-wrapping transform. The first middleware registered with the
/// supervisor runs outermost on each inbound message.
pub type Middleware = Box<dyn Fn(InboundHandler) -> InboundHandler + Send + Sync>;

/// Handle returned by [`ChannelAdapter::start`]: the stop capability for the
/// running connection, if the adapter supports being stopped.
#[derive(Debug, Clone)]
pub struct AdapterRunner {
    cancel: Option<CancellationToken>,
}

impl AdapterRunner {
    /// A runner the supervisor may stop by cancelling the token.
    #[must_use]
    pub fn stoppable(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    /// A runner the supervisor must never tear down (local channels,
    /// process-lifetime listeners). Only root cancellation ends it.
    #[must_use]
    pub fn unstoppable() -> Self {
        Self { cancel: None }
    }

    pub fn supports_stop(&self) -> bool {
        self.cancel.is_some()
    }

    /// Request the adapter's receive loop to stop. No-op when unsupported.
    pub fn stop(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

/// One platform connection.
///
/// `start` may spawn background listeners; implementations must tolerate
/// repeated starts across configuration changes and, when they return a
/// stoppable runner, must observe its token between messages. Each received
/// message should be handed to `handler` on its own task so a slow pipeline
/// never blocks the platform connection; completion order across messages is
/// deliberately unspecified.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Begin consuming inbound traffic for this config. `shutdown` is the
    /// supervisor's root token; adapters without a per-connection stop
    /// capability still observe it for full shutdown.
    async fn start(
        &self,
        shutdown: CancellationToken,
        config: &ChannelConfig,
        handler: InboundHandler,
    ) -> anyhow::Result<AdapterRunner>;

    /// Deliver one outbound message synchronously.
    async fn send(&self, config: &ChannelConfig, message: &OutboundMessage) -> anyhow::Result<()>;
}

/// Consumes normalized inbound messages and produces an optional reply.
///
/// This is the single entry point the supervisor's innermost handler calls;
/// the routing crate provides the implementation.
#[async_trait]
pub trait InboundProcessor: Send + Sync {
    async fn handle_inbound(
        &self,
        config: &ChannelConfig,
        message: InboundMessage,
    ) -> anyhow::Result<Option<OutboundMessage>>;
}
