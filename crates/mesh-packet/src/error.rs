use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("invalid channel name: {0}")]
    InvalidName(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid peer: {0}")]
    InvalidPeer(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}
