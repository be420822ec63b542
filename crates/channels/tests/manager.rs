//! Supervisor behavior: reconciliation convergence, restart-on-change,
//! unstoppable runners, outbound target resolution and reply retry.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use {
    anyhow::{anyhow, Result},
    async_trait::async_trait,
    serde_json::json,
    tokio_util::sync::CancellationToken,
};

use hermod_channels::{
    AdapterRunner, BindingCriteria, ChannelAdapter, ChannelConfig, ChannelManager, ChannelSession,
    ChannelType, ChannelUserBinding, ConfigStore, InboundHandler, InboundMessage, InboundProcessor,
    OutboundMessage, SendRequest, SessionRecord,
};

#[derive(Default)]
struct FakeAdapter {
    stoppable: bool,
    starts: AtomicUsize,
    sends: Mutex<Vec<OutboundMessage>>,
    // Fail this many sends before succeeding.
    send_failures: AtomicUsize,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl FakeAdapter {
    fn stoppable() -> Self {
        Self {
            stoppable: true,
            ..Self::default()
        }
    }

    fn unstoppable() -> Self {
        Self::default()
    }

    fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn stop_count(&self) -> usize {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_cancelled())
            .count()
    }

    fn sent(&self) -> Vec<OutboundMessage> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for FakeAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Telegram
    }

    async fn start(
        &self,
        _shutdown: CancellationToken,
        _config: &ChannelConfig,
        _handler: InboundHandler,
    ) -> Result<AdapterRunner> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.stoppable {
            let token = CancellationToken::new();
            self.tokens.lock().unwrap().push(token.clone());
            Ok(AdapterRunner::stoppable(token))
        } else {
            Ok(AdapterRunner::unstoppable())
        }
    }

    async fn send(&self, _config: &ChannelConfig, message: &OutboundMessage) -> Result<()> {
        let remaining = self.send_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.send_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("upstream unavailable"));
        }
        self.sends.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeStore {
    bindings: Mutex<HashMap<String, ChannelUserBinding>>,
}

impl FakeStore {
    fn with_binding(user_id: &str, channel_type: ChannelType, config: serde_json::Value) -> Self {
        let store = Self::default();
        store.bindings.lock().unwrap().insert(
            user_id.to_string(),
            ChannelUserBinding {
                id: format!("bind-{user_id}"),
                user_id: user_id.to_string(),
                channel_type,
                config,
                created_at: 0,
                updated_at: 0,
            },
        );
        store
    }
}

#[async_trait]
impl ConfigStore for FakeStore {
    async fn resolve_effective_config(
        &self,
        bot_id: &str,
        channel_type: ChannelType,
    ) -> Result<ChannelConfig> {
        Ok(ChannelConfig::local(channel_type, bot_id))
    }

    async fn list_configs_by_type(
        &self,
        _channel_type: ChannelType,
    ) -> Result<Vec<ChannelConfig>> {
        Ok(Vec::new())
    }

    async fn get_user_binding(
        &self,
        user_id: &str,
        _channel_type: ChannelType,
    ) -> Result<Option<ChannelUserBinding>> {
        Ok(self.bindings.lock().unwrap().get(user_id).cloned())
    }

    async fn upsert_user_binding(
        &self,
        _user_id: &str,
        _channel_type: ChannelType,
        _config: serde_json::Value,
    ) -> Result<ChannelUserBinding> {
        Err(anyhow!("not exercised"))
    }

    async fn resolve_user_by_binding(
        &self,
        _channel_type: ChannelType,
        _criteria: &BindingCriteria,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn get_session(&self, _session_id: &str) -> Result<Option<ChannelSession>> {
        Ok(None)
    }

    async fn upsert_session(&self, _record: &SessionRecord) -> Result<()> {
        Ok(())
    }
}

struct FakeProcessor {
    reply: Option<OutboundMessage>,
}

#[async_trait]
impl InboundProcessor for FakeProcessor {
    async fn handle_inbound(
        &self,
        _config: &ChannelConfig,
        _message: InboundMessage,
    ) -> Result<Option<OutboundMessage>> {
        Ok(self.reply.clone())
    }
}

fn config(id: &str, status: &str, updated_at: i64) -> ChannelConfig {
    ChannelConfig {
        id: id.to_string(),
        bot_id: "bot-1".to_string(),
        channel_type: ChannelType::Telegram,
        credentials: json!({"bot_token": "tok"}),
        external_identity: None,
        status: status.to_string(),
        verified_at: None,
        created_at: 1,
        updated_at,
    }
}

fn manager_with(
    adapter: Arc<FakeAdapter>,
    store: Arc<FakeStore>,
    processor: FakeProcessor,
) -> Arc<ChannelManager> {
    let mut manager = ChannelManager::new(store, Arc::new(processor));
    manager.register_adapter(adapter);
    Arc::new(manager)
}

fn inbound(text: &str) -> InboundMessage {
    InboundMessage {
        channel: ChannelType::Telegram,
        text: text.to_string(),
        username: Some("alice".to_string()),
        user_id: None,
        open_id: None,
        chat_id: "c1".to_string(),
        chat_type: None,
        reply_to: Some("c1".to_string()),
        bot_id: "bot-1".to_string(),
        session_key: None,
    }
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let adapter = Arc::new(FakeAdapter::stoppable());
    let manager = manager_with(
        Arc::clone(&adapter),
        Arc::new(FakeStore::default()),
        FakeProcessor { reply: None },
    );
    let shutdown = CancellationToken::new();
    let desired = vec![config("a", "active", 10)];

    Arc::clone(&manager).reconcile(&shutdown, &desired).await;
    Arc::clone(&manager).reconcile(&shutdown, &desired).await;

    assert_eq!(adapter.start_count(), 1);
    assert_eq!(adapter.stop_count(), 0);
    assert_eq!(manager.running_config_ids(), vec!["a".to_string()]);
}

#[tokio::test]
async fn reconcile_converges_on_the_desired_set() {
    let adapter = Arc::new(FakeAdapter::stoppable());
    let manager = manager_with(
        Arc::clone(&adapter),
        Arc::new(FakeStore::default()),
        FakeProcessor { reply: None },
    );
    let shutdown = CancellationToken::new();

    Arc::clone(&manager)
        .reconcile(&shutdown, &[config("a", "active", 10), config("b", "disabled", 10)])
        .await;
    assert_eq!(manager.running_config_ids(), vec!["a".to_string()]);

    Arc::clone(&manager)
        .reconcile(&shutdown, &[config("a", "disabled", 10), config("b", "active", 10)])
        .await;

    assert_eq!(manager.running_config_ids(), vec!["b".to_string()]);
    assert_eq!(adapter.start_count(), 2);
    assert_eq!(adapter.stop_count(), 1);
}

#[tokio::test]
async fn changed_fingerprint_restarts_the_runner() {
    let adapter = Arc::new(FakeAdapter::stoppable());
    let manager = manager_with(
        Arc::clone(&adapter),
        Arc::new(FakeStore::default()),
        FakeProcessor { reply: None },
    );
    let shutdown = CancellationToken::new();

    Arc::clone(&manager).reconcile(&shutdown, &[config("a", "active", 10)]).await;
    Arc::clone(&manager).reconcile(&shutdown, &[config("a", "active", 20)]).await;

    assert_eq!(adapter.start_count(), 2);
    assert_eq!(adapter.stop_count(), 1);
    assert_eq!(manager.running_config_ids(), vec!["a".to_string()]);
}

#[tokio::test]
async fn unstoppable_runner_is_never_torn_down() {
    let adapter = Arc::new(FakeAdapter::unstoppable());
    let manager = manager_with(
        Arc::clone(&adapter),
        Arc::new(FakeStore::default()),
        FakeProcessor { reply: None },
    );
    let shutdown = CancellationToken::new();

    Arc::clone(&manager).reconcile(&shutdown, &[config("a", "active", 10)]).await;
    // Config disappears and later changes; the runner stays as-is.
    Arc::clone(&manager).reconcile(&shutdown, &[]).await;
    Arc::clone(&manager).reconcile(&shutdown, &[config("a", "active", 30)]).await;

    assert_eq!(adapter.start_count(), 1);
    assert_eq!(manager.running_config_ids(), vec!["a".to_string()]);
}

#[tokio::test]
async fn send_derives_target_from_stored_binding() {
    let adapter = Arc::new(FakeAdapter::stoppable());
    let store = Arc::new(FakeStore::with_binding(
        "u1",
        ChannelType::Telegram,
        json!({"username": "alice"}),
    ));
    let manager = manager_with(Arc::clone(&adapter), store, FakeProcessor { reply: None });

    manager
        .send(
            "bot-1",
            ChannelType::Telegram,
            &SendRequest {
                to: None,
                to_user_id: Some("u1".to_string()),
                message: "hi".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(
        adapter.sent(),
        vec![OutboundMessage {
            to: "@alice".to_string(),
            text: "hi".to_string(),
        }]
    );
}

#[tokio::test]
async fn send_without_binding_or_target_fails() {
    let adapter = Arc::new(FakeAdapter::stoppable());
    let manager = manager_with(
        Arc::clone(&adapter),
        Arc::new(FakeStore::default()),
        FakeProcessor { reply: None },
    );

    let err = manager
        .send(
            "bot-1",
            ChannelType::Telegram,
            &SendRequest {
                to: None,
                to_user_id: Some("u1".to_string()),
                message: "hi".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("binding"), "{err}");
    assert!(adapter.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reply_retries_and_succeeds_on_a_later_attempt() {
    let adapter = Arc::new(FakeAdapter::stoppable());
    adapter.send_failures.store(1, Ordering::SeqCst);
    let manager = manager_with(
        Arc::clone(&adapter),
        Arc::new(FakeStore::default()),
        FakeProcessor {
            reply: Some(OutboundMessage {
                to: "c1".to_string(),
                text: "pong".to_string(),
            }),
        },
    );
    let cfg = config("a", "active", 10);

    let started = tokio::time::Instant::now();
    manager.handle_inbound(&cfg, inbound("ping")).await.unwrap();

    // One failure means exactly one backoff wait.
    assert_eq!(started.elapsed(), std::time::Duration::from_millis(500));
    assert_eq!(adapter.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reply_gives_up_after_three_attempts() {
    let adapter = Arc::new(FakeAdapter::stoppable());
    adapter.send_failures.store(10, Ordering::SeqCst);
    let manager = manager_with(
        Arc::clone(&adapter),
        Arc::new(FakeStore::default()),
        FakeProcessor {
            reply: Some(OutboundMessage {
                to: "c1".to_string(),
                text: "pong".to_string(),
            }),
        },
    );
    let cfg = config("a", "active", 10);

    let started = tokio::time::Instant::now();
    let err = manager
        .handle_inbound(&cfg, inbound("ping"))
        .await
        .unwrap_err();

    // Waits after the first and second attempts only: 500ms + 1000ms.
    assert_eq!(started.elapsed(), std::time::Duration::from_millis(1500));
    assert_eq!(adapter.send_failures.load(Ordering::SeqCst), 7);
    assert!(err.to_string().contains("3 attempts"), "{err}");
    let chain = format!("{:#}", anyhow::Error::from(err));
    assert!(chain.contains("upstream unavailable"), "{chain}");
}

#[tokio::test]
async fn empty_reply_is_not_delivered() {
    let adapter = Arc::new(FakeAdapter::stoppable());
    let manager = manager_with(
        Arc::clone(&adapter),
        Arc::new(FakeStore::default()),
        FakeProcessor {
            reply: Some(OutboundMessage {
                to: "c1".to_string(),
                text: "   ".to_string(),
            }),
        },
    );

    let cfg = config("a", "active", 10);
    manager.handle_inbound(&cfg, inbound("ping")).await.unwrap();
    assert!(adapter.sent().is_empty());
}
