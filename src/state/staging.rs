//! staging.rs
//! Most recent sample per robot, read by the frame logger.
//!
//! Kept apart from `RobotStateStore` so the 24 fps logger and the 1 Hz monitor
//! never wait on the same lock. Each entry is replaced atomically (DashMap
//! shard lock); a `read_all` pass may see entries staged at slightly different
//! instants, which the logger tolerates.

use dashmap::DashMap;

use crate::{MotorCommand, RobotId, SensorReading};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedSample {
    pub sensors: SensorReading,
    pub motors: MotorCommand,
    /// UNIX seconds at capture.
    pub timestamp: f64,
}

impl BufferedSample {
    pub fn age(&self, now: f64) -> f64 {
        now - self.timestamp
    }
}

pub struct StagingBuffer {
    slots: DashMap<RobotId, BufferedSample>,
    num_robots: usize,
}

impl StagingBuffer {
    pub fn new(num_robots: usize) -> Self {
        Self {
            slots: DashMap::with_capacity(num_robots),
            num_robots,
        }
    }

    pub fn num_robots(&self) -> usize {
        self.num_robots
    }

    /// Replace the sample for `id`. Ids outside the population are ignored.
    pub fn stage(&self, id: RobotId, sensors: SensorReading, motors: MotorCommand, now: f64) -> bool {
        if id >= self.num_robots {
            return false;
        }
        self.slots.insert(
            id,
            BufferedSample {
                sensors,
                motors,
                timestamp: now,
            },
        );
        true
    }

    /// One entry per robot, ordered by id; `None` where nothing was staged yet.
    pub fn read_all(&self) -> Vec<(RobotId, Option<BufferedSample>)> {
        (0..self.num_robots)
            .map(|id| (id, self.slots.get(&id).map(|entry| *entry.value())))
            .collect()
    }
}
