//! Simulated robot population for bench-testing the controller on one host.
//!
//! Each simulated robot streams random `/sensor [left, right]` readings to the
//! controller and listens for `/motor` replies on its motor port.
//!
//! Usage: `robot_sim [config.toml] [--ip ADDR] [--controller ADDR] [--rate HZ] [--secs N]`
//!
//! Point the controller at the simulator with `robot_base_ip = "127.0.0.1"`.
//! Without `--ip`, robots whose motor endpoint is a loopback address bind
//! exactly that endpoint (127.0.0.1, 127.0.0.2, ...), others bind 127.0.0.1.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
    path::PathBuf,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use rand::random_range;
use rosc::{OscMessage, OscPacket, OscType};

use phototaxis_controller::{
    Config, RobotId, RunFlag,
    transport::{MOTOR_ADDRESS, SENSOR_ADDRESS, SensorSource, osc::OscSource},
    utils::logging::init_logging,
};

const MAX_INTENSITY: f32 = 1000.0;

struct SimArgs {
    config: Option<PathBuf>,
    local_ip: Option<IpAddr>,
    controller_ip: IpAddr,
    rate_hz: f64,
    duration: Duration,
}

impl SimArgs {
    fn parse() -> Result<Self> {
        let mut args = SimArgs {
            config: None,
            local_ip: None,
            controller_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rate_hz: 20.0,
            duration: Duration::from_secs(30),
        };
        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            let mut value = |flag: &str| it.next().with_context(|| format!("{flag} needs a value"));
            match arg.as_str() {
                "--ip" => args.local_ip = Some(value("--ip")?.parse()?),
                "--controller" => args.controller_ip = value("--controller")?.parse()?,
                "--rate" => args.rate_hz = value("--rate")?.parse()?,
                "--secs" => args.duration = Duration::try_from_secs_f64(value("--secs")?.parse()?)?,
                flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
                path => args.config = Some(PathBuf::from(path)),
            }
        }
        if !(args.rate_hz.is_finite() && args.rate_hz > 0.0) {
            bail!("--rate must be > 0");
        }
        Ok(args)
    }
}

#[derive(Debug, Default)]
struct SimStats {
    sent: u64,
    replies: u64,
    last_motor: Option<(i32, i32)>,
}

struct SimRobot {
    id: RobotId,
    motor_rx: OscSource,
    sensor_tx: UdpSocket,
    controller: SocketAddr,
    period: Duration,
}

impl SimRobot {
    fn run(mut self, running: RunFlag) -> SimStats {
        let mut stats = SimStats::default();
        let mut next_send = Instant::now();

        while running.is_running() {
            let now = Instant::now();
            if now >= next_send {
                let left = random_range(0.0..MAX_INTENSITY);
                let right = random_range(0.0..MAX_INTENSITY);
                match self.send_sensor(left, right) {
                    Ok(()) => stats.sent += 1,
                    Err(e) => warn!("[Robot {}] sensor send failed: {e}", self.id),
                }
                next_send += self.period;
                continue;
            }

            match self.motor_rx.recv(next_send - now) {
                Ok(Some(msg)) if msg.address == MOTOR_ADDRESS => {
                    let values: Vec<i32> = msg
                        .args
                        .iter()
                        .filter_map(|v| v.as_f64())
                        .map(|v| v as i32)
                        .collect();
                    if let [left, right] = values[..] {
                        stats.replies += 1;
                        stats.last_motor = Some((left, right));
                        debug!("[Robot {}] /motor {left} {right}", self.id);
                    }
                }
                Ok(Some(msg)) => debug!("[Robot {}] ignoring {}", self.id, msg.address),
                Ok(None) => {}
                Err(e) => warn!("[Robot {}] motor receive failed: {e}", self.id),
            }
        }
        stats
    }

    fn send_sensor(&self, left: f32, right: f32) -> Result<()> {
        let packet = OscPacket::Message(OscMessage {
            addr: SENSOR_ADDRESS.to_string(),
            args: vec![OscType::Float(left), OscType::Float(right)],
        });
        let bytes = rosc::encoder::encode(&packet).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        self.sensor_tx.send_to(&bytes, self.controller)?;
        Ok(())
    }
}

fn motor_bind(config: &Config, id: RobotId, local_ip: Option<IpAddr>) -> SocketAddr {
    let target = config.motor_target(id);
    match local_ip {
        Some(ip) => SocketAddr::new(ip, target.port()),
        None if target.ip().is_loopback() => target,
        None => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), target.port()),
    }
}

fn main() -> Result<()> {
    init_logging();
    let args = SimArgs::parse()?;
    let config = Config::load_or_default(args.config.as_deref())?;
    let period = Duration::from_secs_f64(1.0 / args.rate_hz);
    let running = RunFlag::new();

    info!(
        "Simulating {} robots at {} Hz for {:?}",
        config.num_robots, args.rate_hz, args.duration
    );

    let mut handles: Vec<JoinHandle<SimStats>> = Vec::with_capacity(config.num_robots);
    for id in 0..config.num_robots {
        let bind = motor_bind(&config, id, args.local_ip);
        let robot = SimRobot {
            id,
            motor_rx: OscSource::bind(bind).with_context(|| format!("failed to bind motor port {bind}"))?,
            sensor_tx: UdpSocket::bind(SocketAddr::new(bind.ip(), 0))?,
            controller: SocketAddr::new(
                args.controller_ip,
                config.network.sensor_base_port + id as u16,
            ),
            period,
        };
        info!("[Robot {id}] motor {bind} -> sensors {}", robot.controller);

        let running = running.clone();
        handles.push(
            thread::Builder::new()
                .name(format!("sim-robot-{id}"))
                .spawn(move || robot.run(running))?,
        );
    }

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        match tokio::time::timeout(args.duration, tokio::signal::ctrl_c()).await {
            Ok(Ok(())) => info!("Ctrl-C received, stopping simulation"),
            Ok(Err(e)) => warn!("Signal handling failed: {e}"),
            Err(_) => info!("Simulation time elapsed"),
        }
    });
    running.stop();

    for (id, h) in handles.into_iter().enumerate() {
        match h.join() {
            Ok(stats) => info!(
                "[Robot {id}] sent {} readings, {} motor replies, last motor {:?}",
                stats.sent, stats.replies, stats.last_motor
            ),
            Err(_) => warn!("[Robot {id}] simulator thread panicked"),
        }
    }
    Ok(())
}
