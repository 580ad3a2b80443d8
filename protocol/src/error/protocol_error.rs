use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid CONNECT options: {0}")]
    InvalidConnect(#[source] serde_json::Error),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid token encoding: {0}")]
    TokenEncoding(#[from] base64::DecodeError),

    #[error("Invalid token claims: {0}")]
    TokenClaims(#[source] serde_json::Error),
}
