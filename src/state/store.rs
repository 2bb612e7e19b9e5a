//! store.rs
//! Latest reading, command and update time per robot, for the liveness monitor.
//! - Written by each robot's handler, read by the monitor.
//! - One mutex over the whole table: N is small and every update is O(1),
//!   and a snapshot can never observe a half-written row.

use parking_lot::Mutex;

use crate::{MotorCommand, RobotId, SensorReading};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RobotState {
    pub sensors: SensorReading,
    pub motors: MotorCommand,
    /// UNIX seconds of the last update. `None` until the robot first reports.
    pub last_update: Option<f64>,
}

pub struct RobotStateStore {
    table: Mutex<Vec<RobotState>>,
}

impl RobotStateStore {
    /// Pre-allocates a row for every robot id.
    pub fn new(num_robots: usize) -> Self {
        Self {
            table: Mutex::new(vec![RobotState::default(); num_robots]),
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the row for `id`. Returns false for ids outside the population.
    pub fn update(&self, id: RobotId, sensors: SensorReading, motors: MotorCommand, now: f64) -> bool {
        let mut table = self.table.lock();
        match table.get_mut(id) {
            Some(row) => {
                *row = RobotState {
                    sensors,
                    motors,
                    last_update: Some(now),
                };
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: RobotId) -> Option<RobotState> {
        self.table.lock().get(id).copied()
    }

    /// Copy of every row, ordered by id.
    pub fn snapshot_all(&self) -> Vec<(RobotId, RobotState)> {
        self.table.lock().iter().copied().enumerate().collect()
    }
}
