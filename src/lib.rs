//! # Phototaxis swarm controller
//!
//! Host-side controller for a fixed population of light-seeking robots.
//! Each robot streams `/sensor [left, right]` light readings; the controller
//! answers with `/motor [ML, MR]` and records sensor/motor history at a fixed
//! frame rate for later analysis.
//!
//! ## Pipeline
//! - **Handlers (N):** one thread per robot. Validate → control law → store + staging → send.
//! - **Frame logger:** one CSV row per 1/24 s frame, catching up after stalls.
//! - **Monitor:** warns about robots that went silent.
//! - **Shutdown:** stops every robot and closes the CSV, exactly once.
//!
//! ## Shared state
//! - `RobotStateStore` (one lock) is read by the monitor.
//! - `StagingBuffer` (per-robot entries) is read by the frame logger.
//!   The two never share a lock, so logging never stalls message handling.

pub mod control;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod transport;
pub mod utils;

/// Index of a robot in `0..num_robots`. Also selects its network endpoints.
pub type RobotId = usize;

/// Light intensities from the robot's two sensors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    pub left: f64,
    pub right: f64,
}

/// Motor outputs in `[0, motor_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorCommand {
    pub left: u16,
    pub right: u16,
}

impl MotorCommand {
    pub const STOP: MotorCommand = MotorCommand { left: 0, right: 0 };
}

pub use control::phototaxis::PhototaxisLaw;
pub use error::{ConfigError, ControllerError, LogError};
pub use pipeline::{
    frame_logger::{FrameLogger, LogSink},
    handler::RobotHandler,
    monitor::LivenessMonitor,
    shutdown::{RunFlag, ShutdownSequencer},
};
pub use state::{staging::StagingBuffer, store::RobotStateStore};
pub use utils::config::Config;
