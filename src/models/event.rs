use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Error,
    Warn,
    Info,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Error => "error",
            EventLevel::Warn => "warn",
            EventLevel::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<EventLevel> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Some(EventLevel::Error),
            "warn" | "warning" => Some(EventLevel::Warn),
            "info" => Some(EventLevel::Info),
            _ => None,
        }
    }
}

/// A raw log document pulled in around an anomaly window. Ordered by
/// timestamp ascending within an incident, ties broken by service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedEvent {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: EventLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}
