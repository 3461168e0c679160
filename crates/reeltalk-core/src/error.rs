//! Error types for the relay core

use std::time::Duration;

use thiserror::Error;

/// Failure of an outbound collaborator call (Telegram, knowledge base,
/// generative model, interaction log).
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} API error: {message}")]
    Api {
        service: &'static str,
        message: String,
    },

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),
}

/// Result type alias for collaborator calls
pub type Result<T> = std::result::Result<T, ClientError>;

/// Outcome taxonomy of a dispatched turn.
///
/// Only [`DispatchError::propagates`] variants ever leave the dispatcher;
/// the rest are resolved into a reply (or silence) inside the turn.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("rate limited, retry in {retry_in:?}")]
    RateLimited { retry_in: Duration },

    #[error("invalid event structure: {0}")]
    InvalidEventStructure(String),

    #[error("knowledge lookup unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("generative answer failed: {0}")]
    UpstreamAnswerFailed(#[source] ClientError),

    #[error("turn exceeded its budget of {0:?}")]
    TurnTimeout(Duration),

    #[error("unauthorized command /{0}")]
    UnauthorizedCommand(String),

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("failed to deliver reply: {0}")]
    Send(#[source] ClientError),

    #[error("failed to write interaction log: {0}")]
    LoggingFailed(#[source] ClientError),
}

impl DispatchError {
    /// Whether the error escapes the turn to the transport layer.
    pub fn propagates(&self) -> bool {
        matches!(
            self,
            Self::UpstreamAnswerFailed(_) | Self::TurnTimeout(_) | Self::Send(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_upstream_and_delivery_failures_propagate() {
        assert!(
            DispatchError::UpstreamAnswerFailed(ClientError::InvalidFormat("empty".into()))
                .propagates()
        );
        assert!(DispatchError::TurnTimeout(Duration::from_secs(45)).propagates());
        assert!(
            !DispatchError::RateLimited {
                retry_in: Duration::from_secs(1)
            }
            .propagates()
        );
        assert!(!DispatchError::DependencyUnavailable("down".into()).propagates());
        assert!(
            !DispatchError::LoggingFailed(ClientError::InvalidFormat("disk".into())).propagates()
        );
    }

    #[test]
    fn status_error_names_service() {
        let err = ClientError::Status {
            service: "knowledge base",
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(err.to_string(), "knowledge base returned status 503: busy");
    }
}
