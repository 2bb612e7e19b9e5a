//! monitor.rs
//! Once a second, warn about robots that stopped reporting.
//! Read-only: never touches state or control flow. Robots that never
//! reported are not silent, they have no baseline yet.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, warn};

use crate::pipeline::shutdown::RunFlag;
use crate::state::store::RobotStateStore;
use crate::utils::clock::{sleep_while_running, unix_now};
use crate::RobotId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Silence {
    pub robot: RobotId,
    pub seconds: f64,
}

pub struct LivenessMonitor {
    store: Arc<RobotStateStore>,
    threshold: f64,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(store: Arc<RobotStateStore>, threshold_secs: f64, interval: Duration) -> Self {
        Self {
            store,
            threshold: threshold_secs,
            interval,
        }
    }

    /// Robots silent for longer than the threshold at `now`.
    pub fn check(&self, now: f64) -> Vec<Silence> {
        self.store
            .snapshot_all()
            .into_iter()
            .filter_map(|(robot, state)| {
                let last = state.last_update?;
                let seconds = now - last;
                (seconds > self.threshold).then_some(Silence { robot, seconds })
            })
            .collect()
    }

    pub fn run(&self, running: RunFlag) {
        while running.is_running() {
            for s in self.check(unix_now()) {
                warn!(
                    "Robot {} has not sent data for {:.1} seconds",
                    s.robot, s.seconds
                );
            }
            sleep_while_running(&running, self.interval);
        }
        debug!("[Monitor] stopped");
    }

    pub fn spawn(self, running: RunFlag) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("liveness-monitor".to_string())
            .spawn(move || self.run(running))
    }
}
