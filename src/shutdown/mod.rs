//! Graceful shutdown
//!
//! ```text
//! Running ──signal──► Draining ──drained or timeout──► Closed
//!                       │                               │
//!                 stop admission              close broker, then store
//! ```

mod coordinator;
mod signals;

pub use coordinator::{DrainReport, RunState, ShutdownCoordinator};
pub use signals::ShutdownSignals;
