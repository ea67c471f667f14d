//! Error types for messaging operations

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during messaging operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessagingError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection was closed by this process
    #[error("Connection closed")]
    ConnectionClosed,

    /// Queue or consumer declaration failed
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The queue exists with properties incompatible with the requested ones
    #[error("Queue '{queue}' exists with incompatible properties: {reason}")]
    QueueMismatch { queue: String, reason: String },

    /// Receiving from an established subscription failed
    #[error("Consume failed: {0}")]
    ConsumeFailed(String),

    /// Ack, nack or reject was refused by the broker
    #[error("Acknowledgment failed: {0}")]
    AckFailed(String),

    /// A delivery handle was resolved a second time
    #[error("Delivery handle already resolved")]
    AlreadyResolved,

    /// Publish failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}
