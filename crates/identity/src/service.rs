use {anyhow::Result, async_trait::async_trait};

use crate::types::{BindToken, BotSettings, Contact, ContactChannel, CreateContactRequest};

/// Contact storage and the bind-token lifecycle.
///
/// Implementations own persistence and concurrency control. Lookups that
/// find nothing return `Ok(None)`; only storage failures are errors.
#[async_trait]
pub trait ContactService: Send + Sync {
    async fn get_by_id(&self, contact_id: &str) -> Result<Option<Contact>>;

    /// The contact linked to a user account under one bot.
    async fn get_by_user_id(&self, bot_id: &str, user_id: &str) -> Result<Option<Contact>>;

    /// The channel identity record for a platform sender, if any contact
    /// has claimed it.
    async fn get_by_channel_identity(
        &self,
        bot_id: &str,
        platform: &str,
        external_id: &str,
    ) -> Result<Option<ContactChannel>>;

    async fn create(&self, request: &CreateContactRequest) -> Result<Contact>;

    /// Create a guest contact for an unrecognized sender.
    async fn create_guest(&self, bot_id: &str, display_name: &str) -> Result<Contact>;

    /// Attach (or refresh) a platform identity on a contact.
    async fn upsert_channel(
        &self,
        contact_id: &str,
        platform: &str,
        external_id: &str,
        display_name: &str,
    ) -> Result<ContactChannel>;

    async fn get_bind_token(&self, token: &str) -> Result<Option<BindToken>>;

    /// Atomically mark a token used. `Ok(false)` means another redemption
    /// won the race (or the token was already spent); `Ok(true)` means this
    /// call consumed it.
    async fn consume_bind_token(&self, token: &str) -> Result<bool>;

    /// Link a contact to a user account. Fails when the contact is already
    /// linked to a different account.
    async fn bind_user(&self, contact_id: &str, user_id: &str) -> Result<()>;
}

/// Per-bot policy lookup.
#[async_trait]
pub trait SettingsService: Send + Sync {
    async fn bot_settings(&self, bot_id: &str) -> Result<BotSettings>;
}
