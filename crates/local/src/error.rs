use hermod_common::{impl_context, FromMessage};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("outbound target is required")]
    MissingTarget,

    #[error("outbound text is required")]
    EmptyMessage,
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl_context!();
