//! Narrow message interface between the pipeline and the robots.
//!
//! The pipeline only needs to pull named messages for one robot and push
//! named messages to one robot. Encoding, sockets and retry behaviour live
//! behind these two traits.
//! - `osc` — OSC over UDP, what the robots actually speak.
//! - `channel` — in-process crossbeam channels for tests and demos.

pub mod channel;
pub mod osc;

use std::{fmt, io, time::Duration};

use thiserror::Error;

use crate::RobotId;

pub const SENSOR_ADDRESS: &str = "/sensor";
pub const MOTOR_ADDRESS: &str = "/motor";
pub const LED_ADDRESS: &str = "/LED";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("osc codec error: {0}")]
    Codec(String),
    #[error("no endpoint configured for robot {0}")]
    Unconfigured(RobotId),
    #[error("transport closed")]
    Closed,
}

/// One typed message argument, as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    /// Anything the pipeline never interprets (blobs, booleans, ...).
    Other(String),
}

impl Value {
    /// Numeric view of the argument. Numeric text is accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Other(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Other(s) => write!(f, "<{s}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub address: String,
    pub args: Vec<Value>,
}

impl InboundMessage {
    pub fn sensor(left: f64, right: f64) -> Self {
        Self {
            address: SENSOR_ADDRESS.to_string(),
            args: vec![Value::Float(left), Value::Float(right)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundMessage {
    Motor { left: u16, right: u16 },
    Led { r: u8, g: u8, b: u8 },
}

impl OutboundMessage {
    pub fn address(&self) -> &'static str {
        match self {
            OutboundMessage::Motor { .. } => MOTOR_ADDRESS,
            OutboundMessage::Led { .. } => LED_ADDRESS,
        }
    }

    /// Integer payload in wire order.
    pub fn args(&self) -> Vec<i32> {
        match *self {
            OutboundMessage::Motor { left, right } => vec![i32::from(left), i32::from(right)],
            OutboundMessage::Led { r, g, b } => vec![i32::from(r), i32::from(g), i32::from(b)],
        }
    }
}

/// Inbound side for a single robot. One per handler thread.
pub trait SensorSource: Send {
    /// Wait up to `timeout` for the next message. `Ok(None)` on timeout.
    fn recv(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, TransportError>;
}

/// Outbound side, shared by all handlers and the shutdown sequencer.
pub trait CommandSink: Send + Sync {
    fn send(&self, robot: RobotId, msg: &OutboundMessage) -> Result<(), TransportError>;

    /// Number of robots with an outbound endpoint (ids `0..population`).
    fn population(&self) -> usize;
}
