use crate::models::{Event, EventPayload, NewEvent};
use crate::processing::ProcessingError;
use crate::storage::EventStore;
use std::sync::Arc;

/// Decode a message body into an event, filling defaults for absent fields.
///
/// The body must be a UTF-8 JSON object. Absent or `null` fields take their
/// defaults, unknown fields are ignored, and a non-string value for a known
/// field is a decode error.
pub fn decode_payload(payload: &[u8]) -> Result<NewEvent, ProcessingError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(ProcessingError::Decode(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }

    let payload: EventPayload = serde_json::from_value(value)?;
    Ok(NewEvent::from(payload))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Turns one message body into one row in the event log
pub struct MessageProcessor {
    store: Arc<dyn EventStore>,
}

impl MessageProcessor {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Decode and persist one payload.
    ///
    /// Returns only after the store has committed the row.
    pub async fn process(&self, payload: &[u8]) -> Result<Event, ProcessingError> {
        let event = decode_payload(payload)?;

        self.store
            .insert(&event)
            .await
            .map_err(|cause| ProcessingError::Persist {
                event_type: event.event_type.clone(),
                event_source: event.source.clone(),
                cause,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use crate::storage::{InMemoryEventStore, StoreError};

    #[test]
    fn test_decode_full_payload() {
        let event = decode_payload(
            br#"{"type":"deploy","source":"ci","message":"build ok","severity":"info"}"#,
        )
        .unwrap();

        assert_eq!(event.event_type, "deploy");
        assert_eq!(event.source, "ci");
        assert_eq!(event.message, "build ok");
        assert_eq!(event.severity, Severity::Info);
    }

    #[test]
    fn test_decode_fills_defaults() {
        for payload in [&b"{}"[..], br#"{"type":null,"extra":42}"#] {
            let event = decode_payload(payload).unwrap();
            assert_eq!(event.event_type, "unknown");
            assert_eq!(event.source, "worker");
            assert_eq!(event.message, "");
            assert_eq!(event.severity, Severity::Info);
        }
    }

    #[test]
    fn test_decode_is_deterministic() {
        let payload = br#"{"type":"status","severity":"CRITICAL"}"#;
        assert_eq!(decode_payload(payload), decode_payload(payload));
        assert_eq!(decode_payload(payload).unwrap().severity.as_str(), "CRITICAL");
    }

    #[test]
    fn test_decode_keeps_severity_as_sent() {
        let event = decode_payload(br#"{"type":"deploy","severity":"WARNING"}"#).unwrap();
        assert_eq!(event.severity.as_str(), "WARNING");

        let event = decode_payload(br#"{"type":"deploy","severity":"warning"}"#).unwrap();
        assert_eq!(event.severity, Severity::Warning);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let cases: [&[u8]; 5] = [
            b"not json",
            b"[1,2]",
            b"\"event\"",
            br#"{"type":7}"#,
            &[0xff, 0xfe],
        ];
        for payload in cases {
            let err = decode_payload(payload).unwrap_err();
            assert!(err.is_permanent(), "{:?} should be a decode error", payload);
            assert_eq!(err.reason(), "decode");
        }
    }

    #[tokio::test]
    async fn test_process_persists_event() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = MessageProcessor::new(store.clone());

        let event = processor.process(br#"{"type":"deploy"}"#).await.unwrap();

        assert_eq!(event.event_type, "deploy");
        assert_eq!(store.events(), vec![event]);
    }

    #[tokio::test]
    async fn test_process_reports_store_failure() {
        let store = Arc::new(InMemoryEventStore::new());
        store.close().await;
        let processor = MessageProcessor::new(store.clone());

        let err = processor
            .process(br#"{"type":"deploy","source":"ci"}"#)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ProcessingError::Persist {
                event_type: "deploy".to_string(),
                event_source: "ci".to_string(),
                cause: StoreError::Closed,
            }
        );
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn test_decode_error_skips_store() {
        let store = Arc::new(InMemoryEventStore::new());
        let processor = MessageProcessor::new(store.clone());

        assert!(processor.process(b"{").await.is_err());
        assert!(store.is_empty());
    }
}
