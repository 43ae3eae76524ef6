//! Server-side error types.

use thiserror::Error;

/// Failure to receive from the external topic.
///
/// Everything except [`SubscriptionError::Closed`] is retried by the event
/// bridge with backoff.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The pub/sub backend returned an error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The message stream ended; the next receive resubscribes.
    #[error("subscription stream ended")]
    StreamEnded,
    /// The source will never yield again.
    #[error("event source closed")]
    Closed,
}

/// Errors surfaced while starting the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or querying the listener failed.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
    /// The global metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_error_display() {
        assert_eq!(
            SubscriptionError::StreamEnded.to_string(),
            "subscription stream ended"
        );
        assert_eq!(SubscriptionError::Closed.to_string(), "event source closed");
    }

    #[test]
    fn redis_error_converts() {
        let err: SubscriptionError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
        assert!(err.to_string().starts_with("redis error"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn server_error_from_io() {
        let err: ServerError =
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use").into();
        assert!(err.to_string().contains("address in use"));
    }
}
