use crate::storage::StoreError;

/// Per-message failures. Both kinds are contained to the one delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    /// The body is not a JSON object with string-valued fields
    #[error("Malformed payload: {0}")]
    Decode(String),

    /// The insert failed; nothing was committed
    #[error("Failed to persist '{event_type}' event from '{event_source}': {cause}")]
    Persist {
        event_type: String,
        event_source: String,
        #[source]
        cause: StoreError,
    },
}

impl ProcessingError {
    /// Label used in metrics and logs
    pub fn reason(&self) -> &'static str {
        match self {
            ProcessingError::Decode(_) => "decode",
            ProcessingError::Persist { .. } => "persist",
        }
    }

    /// A redelivery can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProcessingError::Decode(_))
    }
}

impl From<serde_json::Error> for ProcessingError {
    fn from(err: serde_json::Error) -> Self {
        ProcessingError::Decode(err.to_string())
    }
}
