//! Error types for invalidation.

use carecache_store::StoreError;
use thiserror::Error;

/// Result type for invalidation operations.
pub type InvalidationResult<T> = Result<T, InvalidationError>;

/// Invalidation-specific errors.
///
/// None of these reach a domain write path: the dispatcher reports them in
/// its outcome and statistics instead.
#[derive(Debug, Error)]
pub enum InvalidationError {
    /// Cache store error
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    /// Rule rejected at registration
    #[error("Invalid rule for {event_type}: {reason}")]
    InvalidRule { event_type: String, reason: String },

    /// Pattern template is malformed
    #[error("Malformed pattern template {template:?}: {reason}")]
    MalformedPattern { template: String, reason: String },

    /// Placeholder with no value in the event
    #[error("Unresolved placeholder {{{placeholder}}} in {template:?}")]
    UnresolvedPlaceholder { template: String, placeholder: String },

    /// Warming collaborator failed
    #[error("Cache warming failed: {0}")]
    Warming(String),

    /// Queue no longer accepts events
    #[error("Invalidation queue is closed")]
    QueueClosed,

    /// Queue is full
    #[error("Invalidation queue is full")]
    QueueFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = InvalidationError::UnresolvedPlaceholder {
            template: "saas:user:{userId}".into(),
            placeholder: "userId".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unresolved placeholder {userId} in \"saas:user:{userId}\""
        );

        let err: InvalidationError = StoreError::Timeout.into();
        assert!(err.to_string().starts_with("Cache store error"));
    }
}
