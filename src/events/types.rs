//! System event types
//!
//! Defines the events broadcast through the event bus and forwarded to
//! dashboard WebSocket clients.

use serde::{Deserialize, Serialize};

/// System event enumeration
///
/// Serialized as
///
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "room_id": "rpi_car_stream", "state": "connected", "attempt": 1 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Streaming Session Events
    // ============================================================================
    /// Lifecycle manager changed state
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        room_id: String,
        /// "idle", "offering", "awaiting_answer", "connected", "failed", "reconnecting", "closed"
        state: String,
        /// Negotiation attempt number, starting at 1
        attempt: u64,
    },

    /// A negotiation attempt ended with an error
    #[serde(rename = "session.error")]
    SessionError { room_id: String, message: String },

    // ============================================================================
    // Control Events
    // ============================================================================
    /// Movement direction changed
    #[serde(rename = "control.direction_changed")]
    DirectionChanged {
        /// Upper-case direction, e.g. "FORWARD"
        direction: String,
    },

    /// Servo moved to a (clamped) angle
    #[serde(rename = "control.servo_changed")]
    ServoChanged { servo_id: String, angle: u8 },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::SessionError { .. } => "session.error",
            Self::DirectionChanged { .. } => "control.direction_changed",
            Self::ServoChanged { .. } => "control.servo_changed",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports wildcards: "session.*" or "*"
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();
        match topic.strip_suffix(".*") {
            Some(prefix) => event_name.starts_with(prefix),
            None => event_name == topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let event = SystemEvent::DirectionChanged {
            direction: "FORWARD".to_string(),
        };
        assert_eq!(event.event_name(), "control.direction_changed");
    }

    #[test]
    fn test_matches_topic() {
        let event = SystemEvent::SessionStateChanged {
            room_id: "room".to_string(),
            state: "connected".to_string(),
            attempt: 1,
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("session.*"));
        assert!(event.matches_topic("session.state_changed"));
        assert!(!event.matches_topic("control.*"));
    }

    #[test]
    fn test_serialization() {
        let event = SystemEvent::ServoChanged {
            servo_id: "1".to_string(),
            angle: 180,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "control.servo_changed");
        assert_eq!(json["data"]["angle"], 180);
    }
}
