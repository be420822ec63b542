//! Fixed user-facing replies. These go back over the platform verbatim, so
//! they stay short and carry no internal detail.

pub const BIND_SUCCESS_REPLY: &str = "Account linked. Thanks for confirming.";
pub const BIND_TOKEN_USED_REPLY: &str = "This link code was already used.";
pub const BIND_TOKEN_EXPIRED_REPLY: &str = "This link code has expired. Please request a new one.";
pub const BIND_TOKEN_BOT_MISMATCH_REPLY: &str = "This link code belongs to a different bot.";
pub const BIND_TOKEN_PLATFORM_MISMATCH_REPLY: &str =
    "This link code cannot be used on this platform.";
pub const BIND_TOKEN_TARGET_MISMATCH_REPLY: &str =
    "This link code was issued for a different account.";
pub const BIND_SENDER_UNKNOWN_REPLY: &str =
    "Your account on this platform could not be identified.";
pub const BIND_CONTACT_TAKEN_REPLY: &str =
    "This contact is already linked to a different account.";
pub const BIND_FAILED_REPLY: &str = "Linking failed. Please try again later.";
pub const UNBOUND_REPLY: &str =
    "Your account is not linked yet. Please link it before chatting here.";
