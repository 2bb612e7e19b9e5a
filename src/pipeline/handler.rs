//! handler.rs
//! One handler per robot: `/sensor` in, `/motor` out.
//!
//! Per message:
//! 1. validate (exactly two finite numbers), otherwise drop with a warning
//! 2. control law
//! 3. update store + staging buffer, both stamped `now`
//! 4. send `/motor`, then `/LED` if the constant-illumination colour is enabled
//!
//! Send failures are logged and the loop keeps waiting; nothing a single
//! message does can stop the handler or touch another robot.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, warn};

use crate::control::phototaxis::PhototaxisLaw;
use crate::error::ControllerError;
use crate::pipeline::shutdown::RunFlag;
use crate::state::{staging::StagingBuffer, store::RobotStateStore};
use crate::transport::{
    CommandSink, InboundMessage, OutboundMessage, SENSOR_ADDRESS, SensorSource, TransportError,
};
use crate::utils::clock::unix_now;
use crate::{MotorCommand, RobotId, SensorReading};

#[derive(Clone)]
pub struct RobotHandler {
    id: RobotId,
    law: PhototaxisLaw,
    store: Arc<RobotStateStore>,
    staging: Arc<StagingBuffer>,
    outbound: Arc<dyn CommandSink>,
    led: Option<OutboundMessage>,
}

impl RobotHandler {
    pub fn new(
        id: RobotId,
        law: PhototaxisLaw,
        store: Arc<RobotStateStore>,
        staging: Arc<StagingBuffer>,
        outbound: Arc<dyn CommandSink>,
        led: Option<OutboundMessage>,
    ) -> Self {
        Self {
            id,
            law,
            store,
            staging,
            outbound,
            led,
        }
    }

    pub fn id(&self) -> RobotId {
        self.id
    }

    /// Extract `(left, right)` from a `/sensor` payload.
    pub fn parse_reading(&self, msg: &InboundMessage) -> Result<SensorReading, ControllerError> {
        if msg.address != SENSOR_ADDRESS {
            return Err(ControllerError::UnexpectedAddress {
                robot: self.id,
                address: msg.address.clone(),
            });
        }
        let [left, right] = msg.args.as_slice() else {
            return Err(ControllerError::WrongArity {
                robot: self.id,
                got: msg.args.len(),
            });
        };

        let mut values = [0.0; 2];
        for (index, (arg, slot)) in [left, right].into_iter().zip(values.iter_mut()).enumerate() {
            *slot = arg
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ControllerError::NonNumeric {
                    robot: self.id,
                    index,
                    value: arg.to_string(),
                })?;
        }
        Ok(SensorReading {
            left: values[0],
            right: values[1],
        })
    }

    /// Process one inbound message at time `now`.
    ///
    /// State is updated before sending, so a send failure still leaves the
    /// reading in the store and the staging buffer.
    pub fn on_message(&self, msg: &InboundMessage, now: f64) -> Result<MotorCommand, ControllerError> {
        let reading = self.parse_reading(msg)?;
        let command = self.law.compute(reading);

        self.store.update(self.id, reading, command, now);
        self.staging.stage(self.id, reading, command, now);

        self.send(&OutboundMessage::Motor {
            left: command.left,
            right: command.right,
        })?;
        if let Some(led) = &self.led {
            self.send(led)?;
        }
        Ok(command)
    }

    fn send(&self, msg: &OutboundMessage) -> Result<(), ControllerError> {
        self.outbound.send(self.id, msg).map_err(|source| match source {
            TransportError::Unconfigured(robot) => ControllerError::Unconfigured {
                robot,
                population: self.outbound.population(),
            },
            source => ControllerError::Send {
                robot: self.id,
                address: msg.address(),
                source,
            },
        })
    }

    /// Handle messages until the run flag drops or the source closes.
    /// Returns the number of messages that produced a command.
    pub fn run(&self, mut source: Box<dyn SensorSource>, running: RunFlag, poll: Duration) -> u64 {
        let mut handled = 0u64;
        while running.is_running() {
            let msg = match source.recv(poll) {
                Ok(Some(msg)) => msg,
                Ok(None) => continue,
                Err(TransportError::Closed) => break,
                Err(e) => {
                    warn!("Robot {}: receive failed: {e}", self.id);
                    continue;
                }
            };

            // a message that raced with shutdown must not produce a command
            let Some(result) = running.while_running(|| self.on_message(&msg, unix_now())) else {
                break;
            };
            match result {
                Ok(_) => handled += 1,
                Err(e @ ControllerError::UnexpectedAddress { .. }) => debug!("{e}"),
                Err(e) if e.is_malformed() => warn!("{e}"),
                Err(e) => error!("{e}"),
            }
        }
        debug!("[robot-{}] stopped after {handled} messages", self.id);
        handled
    }

    pub fn spawn(
        self,
        source: Box<dyn SensorSource>,
        running: RunFlag,
        poll: Duration,
    ) -> std::io::Result<JoinHandle<u64>> {
        thread::Builder::new()
            .name(format!("robot-{}", self.id))
            .spawn(move || self.run(source, running, poll))
    }
}
