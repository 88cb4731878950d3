//! Control relay
//!
//! Keeps the last commanded direction, joystick vector and servo angles
//! for status queries and forwards every command to the [`Actuator`].
//! All mutations go through one mutex, held across the actuator call, so
//! commands reach the hardware in the order they were accepted.

pub mod actuator;
pub mod types;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use actuator::{Actuator, LoggingActuator};
pub use types::{clamp_angle, Direction, JoystickVector, ServoId};

use crate::error::Result;
use crate::events::{EventBus, SystemEvent};

#[derive(Debug, Default)]
struct ControlState {
    direction: Direction,
    joystick: JoystickVector,
    servos: BTreeMap<String, u8>,
}

/// Result of a movement command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    /// Direction after the command, upper case
    pub direction: String,
    /// False when the command was not recognized
    #[serde(skip)]
    pub recognized: bool,
}

/// Snapshot of the relay state
#[derive(Debug, Clone, Serialize)]
pub struct ControlSnapshot {
    pub direction: String,
    pub joystick: JoystickVector,
    pub servos: BTreeMap<String, u8>,
}

pub struct ControlRelay {
    state: Mutex<ControlState>,
    actuator: Arc<dyn Actuator>,
    events: Arc<EventBus>,
}

impl ControlRelay {
    pub fn new(actuator: Arc<dyn Actuator>, events: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(ControlState::default()),
            actuator,
            events,
        }
    }

    /// Apply a movement command
    ///
    /// Unrecognized commands leave the direction unchanged.
    pub async fn command(&self, command: &str) -> Result<CommandOutcome> {
        let mut state = self.state.lock().await;

        let Some(direction) = Direction::parse(command) else {
            warn!("Unknown movement command: {:?}", command);
            return Ok(CommandOutcome {
                command: command.to_string(),
                direction: state.direction.as_upper().to_string(),
                recognized: false,
            });
        };

        self.actuator.drive(direction).await?;
        let changed = state.direction != direction;
        state.direction = direction;

        if changed {
            self.events.publish(SystemEvent::DirectionChanged {
                direction: direction.as_upper().to_string(),
            });
        }

        Ok(CommandOutcome {
            command: command.to_string(),
            direction: direction.as_upper().to_string(),
            recognized: true,
        })
    }

    /// Forward a joystick vector unchanged
    pub async fn joystick(&self, vector: JoystickVector) -> Result<()> {
        let mut state = self.state.lock().await;
        self.actuator.joystick(vector).await?;
        state.joystick = vector;
        Ok(())
    }

    /// Move a servo, returns the clamped angle
    pub async fn servo(&self, id: ServoId, angle: i64) -> Result<u8> {
        let clamped = clamp_angle(angle);
        if i64::from(clamped) != angle {
            debug!("Servo {} angle {} clamped to {}", id, angle, clamped);
        }

        let mut state = self.state.lock().await;
        self.actuator.servo(&id, clamped).await?;
        state.servos.insert(id.to_string(), clamped);

        self.events.publish(SystemEvent::ServoChanged {
            servo_id: id.to_string(),
            angle: clamped,
        });
        Ok(clamped)
    }

    pub async fn snapshot(&self) -> ControlSnapshot {
        let state = self.state.lock().await;
        ControlSnapshot {
            direction: state.direction.as_upper().to_string(),
            joystick: state.joystick,
            servos: state.servos.clone(),
        }
    }

    /// Stop motion and shut down the actuator
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.actuator.drive(Direction::Stop).await?;
        state.direction = Direction::Stop;
        self.actuator.shutdown().await
    }

    pub fn actuator_name(&self) -> &'static str {
        self.actuator.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay() -> (ControlRelay, Arc<LoggingActuator>, Arc<EventBus>) {
        let actuator = Arc::new(LoggingActuator::new());
        let events = Arc::new(EventBus::new());
        (ControlRelay::new(actuator.clone(), events.clone()), actuator, events)
    }

    #[tokio::test]
    async fn test_direction_command() {
        let (relay, actuator, events) = relay();
        let mut rx = events.subscribe();

        let outcome = relay.command("forward").await.unwrap();
        assert_eq!(outcome.command, "forward");
        assert_eq!(outcome.direction, "FORWARD");
        assert!(outcome.recognized);
        assert_eq!(actuator.command_count(), 1);

        match rx.recv().await.unwrap() {
            SystemEvent::DirectionChanged { direction } => assert_eq!(direction, "FORWARD"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_direction() {
        let (relay, actuator, _) = relay();
        relay.command("left").await.unwrap();

        let outcome = relay.command("moonwalk").await.unwrap();
        assert!(!outcome.recognized);
        assert_eq!(outcome.direction, "LEFT");
        assert_eq!(relay.snapshot().await.direction, "LEFT");

        // Names are matched exactly
        for command in ["FORWARD", " right ", "Stop"] {
            let outcome = relay.command(command).await.unwrap();
            assert!(!outcome.recognized, "{:?} should not be recognized", command);
            assert_eq!(outcome.direction, "LEFT");
        }
        assert_eq!(actuator.command_count(), 1);
    }

    #[tokio::test]
    async fn test_servo_clamp() {
        let (relay, _, _) = relay();
        assert_eq!(relay.servo(ServoId::Number(1), 200).await.unwrap(), 180);
        assert_eq!(relay.servo(ServoId::Number(1), -30).await.unwrap(), 0);
        assert_eq!(relay.servo(ServoId::Name("tilt".into()), 90).await.unwrap(), 90);

        let snapshot = relay.snapshot().await;
        assert_eq!(snapshot.servos["1"], 0);
        assert_eq!(snapshot.servos["tilt"], 90);
    }

    #[tokio::test]
    async fn test_joystick_passthrough() {
        let (relay, _, _) = relay();
        let vector = JoystickVector { x: -42.5, y: 100.0 };
        relay.joystick(vector).await.unwrap();
        assert_eq!(relay.snapshot().await.joystick, vector);
    }

    #[tokio::test]
    async fn test_shutdown_stops() {
        let (relay, _, _) = relay();
        relay.command("forward").await.unwrap();
        relay.shutdown().await.unwrap();
        assert_eq!(relay.snapshot().await.direction, "STOP");
    }
}
