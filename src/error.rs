//! Error taxonomy for the controller.
//!
//! Nothing here is fatal once the pipeline runs: handlers, the frame logger,
//! the monitor and the shutdown sequencer log these where they are detected
//! and carry on. Only startup (`ConfigError`, log file creation, socket bind)
//! can stop the process.

use std::io;

use thiserror::Error;

use crate::transport::TransportError;
use crate::RobotId;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// MalformedMessage: wrong argument count.
    #[error("robot {robot}: invalid /sensor message, expected 2 values, got {got}")]
    WrongArity { robot: RobotId, got: usize },

    /// MalformedMessage: argument is not a finite number.
    #[error("robot {robot}: invalid /sensor argument {index}: {value}")]
    NonNumeric {
        robot: RobotId,
        index: usize,
        value: String,
    },

    #[error("robot {robot}: ignoring message for {address}")]
    UnexpectedAddress { robot: RobotId, address: String },

    /// UnconfiguredRobot: no outbound endpoint for this id.
    #[error("robot {robot}: no motor client configured (population {population})")]
    Unconfigured { robot: RobotId, population: usize },

    /// TransportSendFailure.
    #[error("robot {robot}: failed to send {address}: {source}")]
    Send {
        robot: RobotId,
        address: &'static str,
        #[source]
        source: TransportError,
    },

    /// ResourceTeardownFailure, or a failed row append.
    #[error("log resource: {0}")]
    Log(#[from] LogError),
}

impl ControllerError {
    /// Malformed inbound payloads are reported as warnings, everything else as errors.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ControllerError::WrongArity { .. } | ControllerError::NonNumeric { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("flush failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
