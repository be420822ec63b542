use {anyhow::Result, async_trait::async_trait};

use crate::types::{
    BindingCriteria, ChannelConfig, ChannelSession, ChannelType, ChannelUserBinding, SessionRecord,
};

/// Persistent storage for channel configuration, user bindings and sessions.
///
/// The store is authoritative and responsible for its own concurrency
/// control; session and binding writes must have upsert semantics. Lookups
/// that find nothing return `Ok(None)`; a miss is not an error.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// The configuration outbound/inbound traffic for (bot, channel) runs
    /// under. Local channel types get an ephemeral synthesized config.
    async fn resolve_effective_config(
        &self,
        bot_id: &str,
        channel_type: ChannelType,
    ) -> Result<ChannelConfig>;

    /// All stored configs of one type, across bots. Empty for local types.
    async fn list_configs_by_type(&self, channel_type: ChannelType)
        -> Result<Vec<ChannelConfig>>;

    async fn get_user_binding(
        &self,
        user_id: &str,
        channel_type: ChannelType,
    ) -> Result<Option<ChannelUserBinding>>;

    /// Persist a user's platform binding; the payload is canonicalized
    /// before storage.
    async fn upsert_user_binding(
        &self,
        user_id: &str,
        channel_type: ChannelType,
        config: serde_json::Value,
    ) -> Result<ChannelUserBinding>;

    /// Find the user whose stored binding matches the sender criteria.
    /// First match wins, in the platform's field priority order.
    async fn resolve_user_by_binding(
        &self,
        channel_type: ChannelType,
        criteria: &BindingCriteria,
    ) -> Result<Option<String>>;

    async fn get_session(&self, session_id: &str) -> Result<Option<ChannelSession>>;

    async fn upsert_session(&self, record: &SessionRecord) -> Result<()>;
}
