use thiserror::Error;

/// Failures at the record store boundary.
///
/// The payload is the underlying cause for logs; callers show
/// [`StoreError::user_message`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("invalid evaluation: {0}")]
    Validation(String),
}

impl StoreError {
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Subscription(_) => {
                "Could not load evaluations from the shared store.".to_string()
            }
            StoreError::Write(_) => {
                "Could not save changes to the shared store. Please try again later.".to_string()
            }
            StoreError::Validation(reason) => reason.clone(),
        }
    }

    /// Logs a read-side failure and wraps it.
    pub(crate) fn read(err: impl std::fmt::Display) -> Self {
        tracing::warn!(error = %err, "record store read failed");
        StoreError::Subscription(err.to_string())
    }

    /// Logs a write-side failure and wraps it.
    pub(crate) fn write(err: impl std::fmt::Display) -> Self {
        tracing::warn!(error = %err, "record store write failed");
        StoreError::Write(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_hide_store_details() {
        let err = StoreError::Write("connection reset by peer".to_string());
        assert!(!err.user_message().contains("connection reset"));
        assert!(err.user_message().contains("try again later"));

        let err = StoreError::Validation("assessor name is required".to_string());
        assert_eq!(err.user_message(), "assessor name is required");
    }
}
