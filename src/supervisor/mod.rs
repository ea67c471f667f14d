//! Connection supervision.
//!
//! Opens the store pool and the broker connection at startup under a bounded
//! [`RetryPolicy`], and tracks each connection's [`ConnectionState`] for the
//! rest of the process lifetime.
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Draining ──► Closed
//!       ▲                             │
//!       └──────── (broker drop) ──────┘
//! ```

mod error;
mod retry;
mod state;

pub use error::ConnectionError;
pub use retry::{connect_with_retry, RetryBudget, RetryPolicy};
pub use state::{ConnectionState, ConnectionStateHandle};
