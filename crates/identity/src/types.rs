use serde::{Deserialize, Serialize};

/// A person a bot knows, possibly not yet linked to a user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub bot_id: String,
    /// The linked account, once the contact has confirmed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub display_name: String,
    /// Guests are auto-created from unrecognized senders when the bot's
    /// policy allows it.
    #[serde(default)]
    pub is_guest: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// One platform identity attached to a contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactChannel {
    pub id: String,
    pub contact_id: String,
    pub platform: String,
    /// The sender's identifier on the platform (open id, user id, ...).
    pub external_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CreateContactRequest {
    pub bot_id: String,
    pub user_id: Option<String>,
    pub display_name: String,
    pub is_guest: bool,
}

/// A single-use token a user presents over a channel to link their platform
/// identity to their account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindToken {
    pub token: String,
    pub bot_id: String,
    pub contact_id: String,
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<i64>,
    /// When set, the token may only be redeemed from this platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_platform: Option<String>,
    /// When set, the token may only be redeemed by this external identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_by_user_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

impl BindToken {
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Strictly after the deadline; a token redeemed at the exact expiry
    /// instant is still valid.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at > 0 && now > self.expires_at
    }
}

/// Per-bot routing policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotSettings {
    /// Whether unrecognized senders get a guest contact instead of a
    /// link-your-account reply.
    #[serde(default)]
    pub allow_guest: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> BindToken {
        BindToken {
            token: "t1".into(),
            bot_id: "bot-1".into(),
            contact_id: "c1".into(),
            expires_at: 100,
            used_at: None,
            target_platform: None,
            target_external_id: None,
            issued_by_user_id: None,
            created_at: 0,
        }
    }

    #[test]
    fn expiry_is_strictly_after_the_deadline() {
        let t = token();
        assert!(!t.is_expired(99));
        assert!(!t.is_expired(100));
        assert!(t.is_expired(101));
    }

    #[test]
    fn zero_expiry_never_expires() {
        let mut t = token();
        t.expires_at = 0;
        assert!(!t.is_expired(i64::MAX));
    }

    #[test]
    fn used_at_marks_the_token_spent() {
        let mut t = token();
        assert!(!t.is_used());
        t.used_at = Some(50);
        assert!(t.is_used());
    }
}
