use crate::types::ChannelType;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors for the channel core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No adapter or descriptor is registered for the channel type.
    #[error("unsupported channel type: {channel}")]
    UnsupportedChannel { channel: String },

    /// A descriptor for this channel type was already registered.
    #[error("channel descriptor already registered: {channel}")]
    DuplicateDescriptor { channel: ChannelType },

    /// A credential or binding payload failed schema validation.
    #[error("invalid channel config: {message}")]
    InvalidConfig { message: String },

    /// A stored user binding has none of the fields a delivery target
    /// can be derived from.
    #[error("{channel} binding is incomplete")]
    IncompleteBinding { channel: ChannelType },

    /// No user binding exists for the requested recipient.
    #[error("channel binding required")]
    BindingRequired,

    /// An outbound request named neither an explicit target nor a user.
    #[error("target user id is required")]
    MissingTargetUser,

    /// A reply or send has no delivery target.
    #[error("delivery target is required")]
    MissingTarget,

    /// Outbound text is empty after trimming.
    #[error("message text is required")]
    EmptyMessage,

    /// All delivery attempts failed; carries the final cause.
    #[error("send failed after {attempts} attempts: {source}")]
    SendFailed {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// A collaborator (store, processor, adapter) failed.
    #[error(transparent)]
    Collaborator(anyhow::Error),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn unsupported_channel(channel: impl std::fmt::Display) -> Self {
        Self::UnsupportedChannel {
            channel: channel.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_config(message: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn collaborator(source: anyhow::Error) -> Self {
        Self::Collaborator(source)
    }
}
