//! Control message types

use serde::{Deserialize, Serialize};
use std::fmt;
use typeshare::typeshare;

/// Movement direction
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    #[default]
    Stop,
}

impl Direction {
    /// Parse a movement command
    ///
    /// Only the exact lowercase names are recognized.
    pub fn parse(command: &str) -> Option<Self> {
        match command {
            "forward" => Some(Self::Forward),
            "backward" => Some(Self::Backward),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }

    /// Upper-case form reported by status queries
    pub fn as_upper(&self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Backward => "BACKWARD",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Stop => "STOP",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upper())
    }
}

/// Joystick position, each axis nominally in [-100, 100]
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JoystickVector {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// Servo identifier, sent by clients as a number or a name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServoId {
    Number(u64),
    Name(String),
}

impl fmt::Display for ServoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Name(name) => f.write_str(name),
        }
    }
}

pub const SERVO_MIN_ANGLE: i64 = 0;
pub const SERVO_MAX_ANGLE: i64 = 180;
pub const SERVO_DEFAULT_ANGLE: i64 = 90;

/// Clamp a requested angle into the servo's range
pub fn clamp_angle(angle: i64) -> u8 {
    angle.clamp(SERVO_MIN_ANGLE, SERVO_MAX_ANGLE) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("forward"), Some(Direction::Forward));
        assert_eq!(Direction::parse("left"), Some(Direction::Left));
        assert_eq!(Direction::parse("jump"), None);
        assert_eq!(Direction::parse("FORWARD"), None);
        assert_eq!(Direction::parse(" left "), None);
        assert_eq!(Direction::Backward.as_upper(), "BACKWARD");
        assert_eq!(Direction::default(), Direction::Stop);
    }

    #[test]
    fn test_servo_id_forms() {
        let id: ServoId = serde_json::from_str("1").unwrap();
        assert_eq!(id, ServoId::Number(1));
        let id: ServoId = serde_json::from_str("\"pan\"").unwrap();
        assert_eq!(id.to_string(), "pan");
    }

    #[test]
    fn test_clamp_angle() {
        assert_eq!(clamp_angle(200), 180);
        assert_eq!(clamp_angle(-30), 0);
        assert_eq!(clamp_angle(90), 90);
    }
}
