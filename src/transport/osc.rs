//! OSC over UDP.
//!
//! - `OscSource`: one UDP socket per robot, bound to that robot's sensor port.
//! - `OscSink`: one unbound socket sending to each robot's motor endpoint.
//!
//! Bundles are flattened into their messages in order; the pipeline never
//! looks at OSC time tags.

use std::{
    collections::VecDeque,
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    time::Duration,
};

use log::debug;
use rosc::{OscMessage, OscPacket, OscType};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::transport::{CommandSink, InboundMessage, OutboundMessage, SensorSource, TransportError, Value};
use crate::RobotId;

const MAX_DATAGRAM: usize = rosc::decoder::MTU;

pub struct OscSource {
    socket: UdpSocket,
    timeout: Option<Duration>,
    pending: VecDeque<InboundMessage>,
    buf: Vec<u8>,
}

impl OscSource {
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(addr))?;
        let socket: UdpSocket = socket.into();

        Ok(Self {
            socket,
            timeout: None,
            pending: VecDeque::new(),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        // A zero read timeout is rejected by the OS layer.
        let timeout = timeout.max(Duration::from_millis(1));
        if self.timeout != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            self.timeout = Some(timeout);
        }
        Ok(())
    }
}

impl SensorSource for OscSource {
    fn recv(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, TransportError> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(msg));
        }
        self.set_timeout(timeout)?;

        let (len, from) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let (_, packet) = rosc::decoder::decode_udp(&self.buf[..len])
            .map_err(|e| TransportError::Codec(format!("{e:?} (from {from})")))?;
        flatten(packet, &mut self.pending);
        Ok(self.pending.pop_front())
    }
}

fn flatten(packet: OscPacket, out: &mut VecDeque<InboundMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push_back(from_osc(msg)),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

fn from_osc(msg: OscMessage) -> InboundMessage {
    let args = msg
        .args
        .into_iter()
        .map(|arg| match arg {
            OscType::Int(i) => Value::Int(i64::from(i)),
            OscType::Long(l) => Value::Int(l),
            OscType::Float(f) => Value::Float(f64::from(f)),
            OscType::Double(d) => Value::Float(d),
            OscType::String(s) => Value::Text(s),
            other => Value::Other(format!("{other:?}")),
        })
        .collect();
    InboundMessage {
        address: msg.addr,
        args,
    }
}

pub fn to_osc(msg: &OutboundMessage) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: msg.address().to_string(),
        args: msg.args().into_iter().map(OscType::Int).collect(),
    })
}

pub fn encode(packet: &OscPacket) -> Result<Vec<u8>, TransportError> {
    rosc::encoder::encode(packet).map_err(|e| TransportError::Codec(format!("{e:?}")))
}

/// Outbound OSC client for the whole population; index = robot id.
pub struct OscSink {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
}

impl OscSink {
    pub fn new(bind: SocketAddr, targets: Vec<SocketAddr>) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind)?;
        for (robot, target) in targets.iter().enumerate() {
            debug!("motor client for robot {robot}: {target}");
        }
        Ok(Self { socket, targets })
    }
}

impl CommandSink for OscSink {
    fn send(&self, robot: RobotId, msg: &OutboundMessage) -> Result<(), TransportError> {
        let target = self
            .targets
            .get(robot)
            .ok_or(TransportError::Unconfigured(robot))?;
        let bytes = encode(&to_osc(msg))?;
        self.socket.send_to(&bytes, target)?;
        Ok(())
    }

    fn population(&self) -> usize {
        self.targets.len()
    }
}
