use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error("push channel unavailable")]
    ChannelUnavailable,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TrackError {
    /// Where the tracking view sends the user when it cannot stay open.
    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            TrackError::NotFound(_) | TrackError::Unauthorized(_) | TrackError::Http(_) => {
                Some("/orders")
            }
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no transport could connect: {0}")]
    ConnectFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for TrackError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TrackError::Decode(err.to_string())
        } else {
            TrackError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Protocol(err.to_string())
    }
}
