//! In-process transport over crossbeam channels.
//! Lets the whole pipeline run without sockets: tests feed `/sensor`
//! messages through a `Sender` and read the commands back from the sink.

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};

use crate::transport::{CommandSink, InboundMessage, OutboundMessage, SensorSource, TransportError};
use crate::RobotId;

pub struct ChannelSource {
    rx: Receiver<InboundMessage>,
}

impl ChannelSource {
    /// Bounded inbound queue for one robot.
    pub fn pair(capacity: usize) -> (Sender<InboundMessage>, Self) {
        let (tx, rx) = bounded(capacity);
        (tx, Self { rx })
    }
}

impl SensorSource for ChannelSource {
    fn recv(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

/// Collects every outbound command, tagged with the robot it was addressed to.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<(RobotId, OutboundMessage)>,
    population: usize,
}

impl ChannelSink {
    pub fn new(population: usize) -> (Self, Receiver<(RobotId, OutboundMessage)>) {
        let (tx, rx) = unbounded();
        (Self { tx, population }, rx)
    }
}

impl CommandSink for ChannelSink {
    fn send(&self, robot: RobotId, msg: &OutboundMessage) -> Result<(), TransportError> {
        if robot >= self.population {
            return Err(TransportError::Unconfigured(robot));
        }
        self.tx.try_send((robot, *msg)).map_err(|e| match e {
            TrySendError::Full(_) | TrySendError::Disconnected(_) => TransportError::Closed,
        })
    }

    fn population(&self) -> usize {
        self.population
    }
}
