use thiserror::Error;

/// Failure classes surfaced by the client. Malformed-but-recoverable server
/// payloads are not represented here: those are logged and dropped at the
/// normalization boundary and never reach a caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("malformed server payload: {0}")]
    Payload(String),

    #[error("invalid server url: {0}")]
    BadUrl(#[from] url::ParseError),

    #[error("bearer token is not a valid credential")]
    InvalidToken,

    #[error("{action} was rolled back: {source}")]
    Mutation {
        action: &'static str,
        #[source]
        source: Box<ClientError>,
    },
}

impl ClientError {
    /// Wraps a transport failure as a rolled-back optimistic mutation.
    pub fn rolled_back(action: &'static str, source: ClientError) -> Self {
        Self::Mutation {
            action,
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Payload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
