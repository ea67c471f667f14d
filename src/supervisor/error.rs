//! Error types for connection supervision

/// Errors raised while establishing connections at startup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Every attempt in the retry budget failed
    #[error("Could not connect to {target} after {attempts} attempts: {last_error}")]
    Exhausted {
        target: String,
        attempts: u32,
        last_error: String,
    },

    /// Shutdown was requested before a connection could be established
    #[error("Connecting to {target} was cancelled after {attempts} attempts")]
    Cancelled { target: String, attempts: u32 },
}

impl ConnectionError {
    pub fn target(&self) -> &str {
        match self {
            ConnectionError::Exhausted { target, .. } | ConnectionError::Cancelled { target, .. } => {
                target
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ConnectionError::Exhausted { attempts, .. } | ConnectionError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }
}
