use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_EVENT_TYPE: &str = "unknown";
pub const DEFAULT_SOURCE: &str = "worker";
pub const DEFAULT_MESSAGE: &str = "";

/// Event severity.
///
/// The canonical lowercase names map to the known levels. Any other text,
/// including a differently cased known name, is kept verbatim so the stored
/// value is exactly what the producer sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
    Other(String),
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
            Severity::Other(raw) => raw,
        }
    }
}

impl FromStr for Severity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "info" => Severity::Info,
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            "critical" => Severity::Critical,
            _ => Severity::Other(s.to_string()),
        })
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

/// Inbound message body. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

/// A decoded event that has not been written yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewEvent {
    pub event_type: String,
    pub source: String,
    pub message: String,
    pub severity: Severity,
}

impl From<EventPayload> for NewEvent {
    fn from(payload: EventPayload) -> Self {
        Self {
            event_type: payload
                .event_type
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            source: payload.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            message: payload.message.unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
            severity: payload.severity.unwrap_or_default(),
        }
    }
}

impl NewEvent {
    /// Attach the store-assigned timestamp
    pub fn persisted(self, created_at: DateTime<Utc>) -> Event {
        Event {
            event_type: self.event_type,
            source: self.source,
            message: self.message,
            severity: self.severity,
            created_at,
        }
    }
}

/// A row in the event log. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub event_type: String,
    pub source: String,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parsing() {
        assert_eq!("info".parse::<Severity>().unwrap(), Severity::Info);
        assert_eq!("warning".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!(
            "fatal".parse::<Severity>().unwrap(),
            Severity::Other("fatal".to_string())
        );
        assert_eq!(Severity::Other("Fatal".to_string()).to_string(), "Fatal");
        assert_eq!(Severity::default(), Severity::Info);
    }

    #[test]
    fn test_severity_spelling_is_preserved() {
        for raw in ["WARNING", "Info", "eRRor", "CRITICAL"] {
            let severity: Severity = raw.parse().unwrap();
            assert_eq!(severity, Severity::Other(raw.to_string()));
            assert_eq!(severity.as_str(), raw);
        }

        let severity: Severity = serde_json::from_str(r#""WARNING""#).unwrap();
        assert_eq!(serde_json::to_string(&severity).unwrap(), r#""WARNING""#);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let event = NewEvent::from(EventPayload::default());
        assert_eq!(event.event_type, "unknown");
        assert_eq!(event.source, "worker");
        assert_eq!(event.message, "");
        assert_eq!(event.severity, Severity::Info);
    }

    #[test]
    fn test_persisted_keeps_fields() {
        let now = Utc::now();
        let event = NewEvent {
            event_type: "deploy".to_string(),
            source: "ci".to_string(),
            message: "build ok".to_string(),
            severity: Severity::Warning,
        }
        .persisted(now);

        assert_eq!(event.event_type, "deploy");
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.created_at, now);
    }
}
