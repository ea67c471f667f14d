mod error;
mod processor;

pub use error::ProcessingError;
pub use processor::{decode_payload, MessageProcessor};
