use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of an event attached to a Migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// A user-visible event recorded against a Migration object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEvent {
    /// Namespace of the Migration
    pub namespace: String,
    /// Name of the Migration
    pub name: String,
    pub event_type: EventType,
    /// Short machine-readable reason, usually a status value
    pub reason: String,
    pub message: String,
}

impl MigrationEvent {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        event_type: EventType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            event_type,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.event_type == EventType::Warning
    }
}
