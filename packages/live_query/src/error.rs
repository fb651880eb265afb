//! Error taxonomy for the live query client.

/// Errors produced by the codec, the object decoder, the server, and the transport.
///
/// Per-message failures (`InvalidJson`, `InvalidResponse`, `DecodeFailure`,
/// `ServerReported`) are scoped to one inbound message and never tear down the
/// connection. `Transport` failures feed the reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveQueryError {
    #[error("invalid json: expected key `{expected_key}` in {payload}")]
    InvalidJson {
        payload: String,
        expected_key: String,
    },

    #[error("invalid response: {raw}")]
    InvalidResponse { raw: String },

    #[error("failed to decode object: {reason} ({payload})")]
    DecodeFailure { payload: String, reason: String },

    #[error("server error {code}: {message}")]
    ServerReported {
        code: i64,
        message: String,
        reconnect: bool,
    },

    #[error("transport failure: {cause}")]
    Transport { cause: String },

    #[error("invalid server url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("live query client requires a running tokio runtime")]
    NoRuntime,

    #[error("live query client has been shut down")]
    ClientClosed,
}

impl LiveQueryError {
    pub(crate) fn invalid_json(payload: impl Into<String>, expected_key: &str) -> Self {
        Self::InvalidJson {
            payload: payload.into(),
            expected_key: expected_key.to_string(),
        }
    }

    pub(crate) fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            cause: cause.to_string(),
        }
    }

    /// True for failures that concern a single inbound message.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Self::InvalidJson { .. }
                | Self::InvalidResponse { .. }
                | Self::DecodeFailure { .. }
                | Self::ServerReported { .. }
        )
    }

    /// The server's reconnect hint, if this is a server-reported error.
    pub fn reconnect_hint(&self) -> Option<bool> {
        match self {
            Self::ServerReported { reconnect, .. } => Some(*reconnect),
            _ => None,
        }
    }
}

impl From<figment::Error> for LiveQueryError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}
