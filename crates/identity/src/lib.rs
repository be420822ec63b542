//! Contact identity: the people a bot talks to, their per-platform channel
//! identities, bind tokens that link a platform identity to an account, and
//! per-bot policy settings.

pub mod service;
pub mod types;

pub use {
    service::{ContactService, SettingsService},
    types::{BindToken, BotSettings, Contact, ContactChannel, CreateContactRequest},
};
