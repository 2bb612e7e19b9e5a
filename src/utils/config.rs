//! Controller configuration, loaded once at startup from TOML.
//!
//! Every key has a default matching the lab deployment (10 robots,
//! sensors on 60000+i, motors on 61000+i at 192.168.50.(50+i)), so an
//! empty or missing file yields a working config.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use log::{info, warn};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::transport::OutboundMessage;
use crate::RobotId;

pub const DEFAULT_CONFIG_PATH: &str = "config/controller.toml";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub num_robots: usize,
    pub network: NetworkConfig,
    pub control: ControlConfig,
    pub recording: RecordingConfig,
    pub monitor: MonitorConfig,
    pub led: LedConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub bind_ip: IpAddr,
    pub sensor_base_port: u16,
    pub motor_base_port: u16,
    pub robot_base_ip: Ipv4Addr,
    pub recv_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    pub motor_max: u16,
    pub alpha: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RecordingConfig {
    pub log_dir: PathBuf,
    pub file_prefix: String,
    pub frame_rate: f64,
    pub staleness_secs: f64,
    pub flush_every_frames: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub interval_secs: f64,
    pub silence_threshold_secs: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LedConfig {
    pub enabled: bool,
    pub color: [u8; 3],
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    pub stop_repeats: u32,
    pub stop_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_robots: 10,
            network: NetworkConfig::default(),
            control: ControlConfig::default(),
            recording: RecordingConfig::default(),
            monitor: MonitorConfig::default(),
            led: LedConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            sensor_base_port: 60_000,
            motor_base_port: 61_000,
            robot_base_ip: Ipv4Addr::new(192, 168, 50, 50),
            recv_timeout_ms: 200,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            motor_max: 200,
            alpha: 8.0,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("robot_logs"),
            file_prefix: "phototaxis".to_string(),
            frame_rate: 24.0,
            staleness_secs: 0.5,
            flush_every_frames: 10,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            silence_threshold_secs: 5.0,
        }
    }
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            color: [0, 0, 0],
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_repeats: 3,
            stop_delay_ms: 10,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Explicit path must load; otherwise try the default path, then built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let config = Self::load(path)?;
            info!("Config loaded from {}", path.display());
            return Ok(config);
        }

        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            match Self::load(default_path) {
                Ok(config) => {
                    info!("Config loaded from {}", default_path.display());
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring {}: {}", default_path.display(), e),
            }
        }
        info!("No config file, using built-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.num_robots == 0 {
            return invalid("num_robots must be at least 1".into());
        }
        if !(self.control.alpha.is_finite() && self.control.alpha > 0.0) {
            return invalid(format!("control.alpha must be > 0, got {}", self.control.alpha));
        }
        if !(self.recording.frame_rate.is_finite() && self.recording.frame_rate > 0.0) {
            return invalid(format!(
                "recording.frame_rate must be > 0, got {}",
                self.recording.frame_rate
            ));
        }
        if !(self.recording.staleness_secs.is_finite() && self.recording.staleness_secs >= 0.0) {
            return invalid(format!(
                "recording.staleness_secs must be finite and >= 0, got {}",
                self.recording.staleness_secs
            ));
        }
        // the logger wakes every half frame
        if !nonzero_duration(self.frame_interval() / 2.0) {
            return invalid(format!(
                "recording.frame_rate {} gives no usable frame interval",
                self.recording.frame_rate
            ));
        }
        if self.recording.flush_every_frames == 0 {
            return invalid("recording.flush_every_frames must be at least 1".into());
        }
        if !nonzero_duration(self.monitor.interval_secs) {
            return invalid(format!(
                "monitor.interval_secs must be finite and > 0, got {}",
                self.monitor.interval_secs
            ));
        }
        let silence = self.monitor.silence_threshold_secs;
        if !(silence.is_finite() && silence >= 0.0) {
            return invalid(format!(
                "monitor.silence_threshold_secs must be finite and >= 0, got {silence}"
            ));
        }

        let last = self.num_robots - 1;
        for (name, base) in [
            ("network.sensor_base_port", self.network.sensor_base_port),
            ("network.motor_base_port", self.network.motor_base_port),
        ] {
            if usize::from(base) + last > usize::from(u16::MAX) {
                return invalid(format!("{name} {base} + {last} robots overflows the port range"));
            }
        }
        if u64::from(u32::from(self.network.robot_base_ip)) + last as u64 > u64::from(u32::MAX) {
            return invalid("network.robot_base_ip + num_robots overflows IPv4".into());
        }
        Ok(())
    }

    /// Local address robot `id` sends its `/sensor` messages to.
    pub fn sensor_bind(&self, id: RobotId) -> SocketAddr {
        SocketAddr::new(self.network.bind_ip, self.network.sensor_base_port + id as u16)
    }

    /// Remote address robot `id` listens on for `/motor`.
    pub fn motor_target(&self, id: RobotId) -> SocketAddr {
        let ip = Ipv4Addr::from(u32::from(self.network.robot_base_ip) + id as u32);
        SocketAddr::new(IpAddr::V4(ip), self.network.motor_base_port + id as u16)
    }

    pub fn motor_targets(&self) -> Vec<SocketAddr> {
        (0..self.num_robots).map(|id| self.motor_target(id)).collect()
    }

    pub fn frame_interval(&self) -> f64 {
        1.0 / self.recording.frame_rate
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.monitor.interval_secs).unwrap_or(Duration::from_secs(1))
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.network.recv_timeout_ms)
    }

    /// Indicator message sent after every motor command, if enabled.
    pub fn led_message(&self) -> Option<OutboundMessage> {
        self.led.enabled.then(|| {
            let [r, g, b] = self.led.color;
            OutboundMessage::Led { r, g, b }
        })
    }
}

fn nonzero_duration(secs: f64) -> bool {
    Duration::try_from_secs_f64(secs).is_ok_and(|d| !d.is_zero())
}
