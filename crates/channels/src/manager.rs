//! Adapter supervisor.
//!
//! Owns the set of running platform connections and continuously reconciles
//! it against stored configuration: desired configs get a runner, stale
//! runners are restarted when their config fingerprint changes, and runners
//! whose config went away are stopped. An adapter that cannot be stopped is
//! left alone by reconciliation; only full shutdown ends it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

use crate::{
    adapter::{AdapterRunner, ChannelAdapter, InboundHandler, InboundProcessor, Middleware},
    config,
    error::{Error, Result},
    store::ConfigStore,
    types::{ChannelConfig, ChannelType, InboundMessage, OutboundMessage, SendRequest},
};

/// How often the reconciliation loop re-reads desired configuration.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Reply delivery attempts before giving up.
const SEND_ATTEMPTS: u32 = 3;

/// Base wait between reply delivery attempts; attempt `n` waits `n` times
/// this long before attempt `n + 1`.
const SEND_BACKOFF_STEP: Duration = Duration::from_millis(500);

struct RunningAdapter {
    config: ChannelConfig,
    runner: AdapterRunner,
}

/// Supervisor for platform adapters; also the outbound send surface.
pub struct ChannelManager {
    store: Arc<dyn ConfigStore>,
    processor: Arc<dyn InboundProcessor>,
    adapters: HashMap<ChannelType, Arc<dyn ChannelAdapter>>,
    middlewares: Vec<Middleware>,
    refresh_interval: Duration,
    // Keyed by config id. Held only for map mutation, never across I/O.
    runners: Mutex<HashMap<String, RunningAdapter>>,
}

impl ChannelManager {
    pub fn new(store: Arc<dyn ConfigStore>, processor: Arc<dyn InboundProcessor>) -> Self {
        Self {
            store,
            processor,
            adapters: HashMap::new(),
            middlewares: Vec::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            runners: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let channel = adapter.channel_type();
        self.adapters.insert(channel, adapter);
        info!(channel = %channel, "adapter registered");
    }

    /// Register a middleware. The first one registered runs outermost on
    /// every inbound message.
    pub fn use_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    /// Run reconciliation now, then on every tick until `shutdown` fires,
    /// at which point every stoppable runner is stopped.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) {
        info!("channel manager started");
        tokio::spawn(async move {
            Self::refresh(&self, &shutdown).await;
            let mut ticker = tokio::time::interval(self.refresh_interval);
            ticker.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("channel manager stopped");
                        self.stop_all();
                        return;
                    }
                    _ = ticker.tick() => Self::refresh(&self, &shutdown).await,
                }
            }
        });
    }

    /// The composed inbound handler chain, ending in [`Self::handle_inbound`].
    /// Local surfaces feed their messages through this.
    pub fn handler(self: Arc<Self>) -> InboundHandler {
        let manager = Arc::clone(&self);
        let mut handler: InboundHandler = Arc::new(move |cfg, msg| {
            let manager = Arc::clone(&manager);
            Box::pin(async move { Ok(manager.handle_inbound(&cfg, msg).await?) })
        });
        for middleware in self.middlewares.iter().rev() {
            handler = middleware(handler);
        }
        handler
    }

    async fn refresh(manager: &Arc<Self>, shutdown: &CancellationToken) {
        let mut configs = Vec::new();
        for channel in manager.adapters.keys() {
            match manager.store.list_configs_by_type(*channel).await {
                Ok(items) => configs.extend(items),
                Err(err) => {
                    error!(channel = %channel, error = %err, "listing channel configs failed");
                }
            }
        }
        Arc::clone(manager).reconcile(shutdown, &configs).await;
    }

    /// Converge the runner table onto the desired config set.
    pub async fn reconcile(
        self: Arc<Self>,
        shutdown: &CancellationToken,
        configs: &[ChannelConfig],
    ) {
        let mut active: HashMap<&str, &ChannelConfig> = HashMap::new();
        for cfg in configs {
            if cfg.id.is_empty() || !is_active_status(&cfg.status) {
                continue;
            }
            active.insert(cfg.id.as_str(), cfg);
            if let Err(err) = Self::ensure_runner(&self, shutdown, cfg).await {
                // Left unstarted until the next tick; no immediate retry.
                error!(
                    channel = %cfg.channel_type,
                    config_id = %cfg.id,
                    error = %err,
                    "adapter start failed"
                );
            }
        }

        let mut runners = self.runners.lock().unwrap_or_else(|e| e.into_inner());
        runners.retain(|id, running| {
            if active.contains_key(id.as_str()) {
                return true;
            }
            if running.runner.supports_stop() {
                info!(
                    channel = %running.config.channel_type,
                    config_id = %id,
                    "adapter stopped"
                );
                running.runner.stop();
                false
            } else {
                warn!(
                    channel = %running.config.channel_type,
                    config_id = %id,
                    "adapter removal skipped: stop not supported"
                );
                true
            }
        });
    }

    /// Start (or restart) the runner for one desired config. No-op when a
    /// runner already exists with the same `updated_at` fingerprint.
    async fn ensure_runner(
        manager: &Arc<Self>,
        shutdown: &CancellationToken,
        cfg: &ChannelConfig,
    ) -> Result<()> {
        {
            let mut runners = manager.runners.lock().unwrap_or_else(|e| e.into_inner());
            match runners.get(&cfg.id) {
                Some(existing) if existing.config.updated_at == cfg.updated_at => {
                    return Ok(());
                }
                Some(existing) if !existing.runner.supports_stop() => {
                    warn!(
                        channel = %cfg.channel_type,
                        config_id = %cfg.id,
                        "adapter restart skipped: stop not supported"
                    );
                    return Ok(());
                }
                Some(existing) => {
                    info!(
                        channel = %cfg.channel_type,
                        config_id = %cfg.id,
                        "adapter restarting: config changed"
                    );
                    existing.runner.stop();
                }
                None => {}
            }
            runners.remove(&cfg.id);
        }

        let adapter = manager
            .adapters
            .get(&cfg.channel_type)
            .ok_or_else(|| Error::unsupported_channel(cfg.channel_type))?;

        info!(channel = %cfg.channel_type, config_id = %cfg.id, "adapter starting");
        let runner = adapter
            .start(shutdown.child_token(), cfg, Arc::clone(manager).handler())
            .await
            .map_err(Error::collaborator)?;

        let mut runners = manager.runners.lock().unwrap_or_else(|e| e.into_inner());
        runners.insert(
            cfg.id.clone(),
            RunningAdapter {
                config: cfg.clone(),
                runner,
            },
        );
        Ok(())
    }

    fn stop_all(&self) {
        let mut runners = self.runners.lock().unwrap_or_else(|e| e.into_inner());
        for (id, running) in runners.drain() {
            if running.runner.supports_stop() {
                info!(
                    channel = %running.config.channel_type,
                    config_id = %id,
                    "adapter stopped"
                );
                running.runner.stop();
            }
        }
    }

    /// Config ids with a live runner. Test and introspection surface.
    pub fn running_config_ids(&self) -> Vec<String> {
        let runners = self.runners.lock().unwrap_or_else(|e| e.into_inner());
        runners.keys().cloned().collect()
    }

    /// Send one outbound message for a bot over a channel.
    ///
    /// When the request names no explicit target, the recipient user's
    /// stored binding supplies one (platform-specific derivation).
    pub async fn send(
        &self,
        bot_id: &str,
        channel_type: ChannelType,
        request: &SendRequest,
    ) -> Result<()> {
        let adapter = self
            .adapters
            .get(&channel_type)
            .ok_or_else(|| Error::unsupported_channel(channel_type))?;
        let cfg = self
            .store
            .resolve_effective_config(bot_id, channel_type)
            .await
            .map_err(Error::collaborator)?;

        let target = match request.to.as_deref().map(str::trim) {
            Some(to) if !to.is_empty() => to.to_string(),
            _ => {
                let user_id = request
                    .to_user_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or(Error::MissingTargetUser)?;
                let binding = self
                    .store
                    .get_user_binding(user_id, channel_type)
                    .await
                    .map_err(Error::collaborator)?
                    .ok_or_else(|| {
                        warn!(channel = %channel_type, user_id, "channel binding missing");
                        Error::BindingRequired
                    })?;
                config::resolve_delivery_target(channel_type, &binding.config)?
            }
        };

        let text = request.message.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }

        info!(channel = %channel_type, bot_id, "sending outbound message");
        adapter
            .send(
                &cfg,
                &OutboundMessage {
                    to: target,
                    text: text.to_string(),
                },
            )
            .await
            .map_err(|err| {
                error!(channel = %channel_type, bot_id, error = %err, "outbound send failed");
                Error::collaborator(err)
            })
    }

    /// Single inbound entry point: route the message through the processor
    /// and deliver any reply with retry.
    pub async fn handle_inbound(&self, cfg: &ChannelConfig, msg: InboundMessage) -> Result<()> {
        let channel = msg.channel;
        let reply = self
            .processor
            .handle_inbound(cfg, msg)
            .await
            .map_err(|err| {
                error!(channel = %channel, error = %err, "inbound processing failed");
                Error::collaborator(err)
            })?;

        let Some(reply) = reply else { return Ok(()) };
        if reply.text.trim().is_empty() {
            return Ok(());
        }
        if reply.to.trim().is_empty() {
            return Err(Error::MissingTarget);
        }

        let adapter = self
            .adapters
            .get(&channel)
            .ok_or_else(|| Error::unsupported_channel(channel))?;

        info!(channel = %channel, "sending reply");
        let mut last_err = None;
        for attempt in 1..=SEND_ATTEMPTS {
            match adapter.send(cfg, &reply).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(channel = %channel, attempt, error = %err, "reply delivery failed");
                    last_err = Some(err);
                    if attempt < SEND_ATTEMPTS {
                        tokio::time::sleep(SEND_BACKOFF_STEP * attempt).await;
                    }
                }
            }
        }

        Err(Error::SendFailed {
            attempts: SEND_ATTEMPTS,
            source: last_err.unwrap_or_else(|| anyhow::anyhow!("send failed")),
        })
    }
}

/// Desired statuses that should have a running adapter. An empty status is
/// treated as active.
fn is_active_status(status: &str) -> bool {
    let status = status.trim().to_ascii_lowercase();
    status.is_empty() || status == "active" || status == "verified"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_statuses() {
        for status in ["", "  ", "active", "ACTIVE", "verified"] {
            assert!(is_active_status(status), "{status:?}");
        }
        for status in ["pending", "disabled", "error"] {
            assert!(!is_active_status(status), "{status:?}");
        }
    }
}
