use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("unknown message type: {0}")]
    UnknownMessage(u8),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("membership error: {0}")]
    Membership(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("quorum not reached: {0}")]
    Quorum(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, KvError>;
