//! Hardware actuation seam
//!
//! Motor drivers and servo controllers implement [`Actuator`]. The relay
//! forwards commands unchanged; mapping a joystick vector onto motor outputs
//! is the actuator's business.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::types::{Direction, JoystickVector, ServoId};
use crate::error::Result;

#[async_trait]
pub trait Actuator: Send + Sync {
    /// Actuator name for logs
    fn name(&self) -> &'static str;

    async fn drive(&self, direction: Direction) -> Result<()>;

    async fn joystick(&self, vector: JoystickVector) -> Result<()>;

    /// `angle` is already clamped to [0, 180]
    async fn servo(&self, id: &ServoId, angle: u8) -> Result<()>;

    /// Stop all motion and release the hardware
    async fn shutdown(&self) -> Result<()>;
}

/// Actuator that only logs, for hosts without motor hardware
#[derive(Default)]
pub struct LoggingActuator {
    commands: AtomicU64,
}

impl LoggingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands received so far
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Actuator for LoggingActuator {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn drive(&self, direction: Direction) -> Result<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        info!("Drive: {}", direction);
        Ok(())
    }

    async fn joystick(&self, vector: JoystickVector) -> Result<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        debug!("Joystick: x={} y={}", vector.x, vector.y);
        Ok(())
    }

    async fn servo(&self, id: &ServoId, angle: u8) -> Result<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        info!("Servo {} -> {} degrees", id, angle);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Actuator shut down after {} commands", self.command_count());
        Ok(())
    }
}
