//! phototaxis.rs
//! Maps a pair of light-sensor intensities to a pair of motor outputs.
//!
//!   r_L = (SR + 1) / (SL + SR + 2)      r_R = (SL + 1) / (SL + SR + 2)
//!   ML  = M_max * σ_α(r_L)              MR  = M_max * σ_α(r_R)
//!
//! Each motor is driven by the opposite sensor, so the robot turns toward light.
//! Pure: no state, no I/O.

use crate::{MotorCommand, SensorReading};

/// Contrast function σ_α(x) = x^α / (x^α + (1-x)^α), pinned to 0 and 1 at the boundaries.
pub fn sharp_sigmoid(x: f64, alpha: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let xn = x.powf(alpha);
    let yn = (1.0 - x).powf(alpha);
    xn / (xn + yn)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhototaxisLaw {
    pub motor_max: u16,
    pub alpha: f64,
}

impl PhototaxisLaw {
    pub fn new(motor_max: u16, alpha: f64) -> Self {
        Self { motor_max, alpha }
    }

    pub fn compute(&self, reading: SensorReading) -> MotorCommand {
        let sl = reading.left.max(0.0);
        let sr = reading.right.max(0.0);

        // >= 2 for non-negative inputs
        let denom = sl + sr + 2.0;
        let r_left = (sr + 1.0) / denom;
        let r_right = (sl + 1.0) / denom;

        MotorCommand {
            left: self.scale(sharp_sigmoid(r_left, self.alpha)),
            right: self.scale(sharp_sigmoid(r_right, self.alpha)),
        }
    }

    fn scale(&self, y: f64) -> u16 {
        let max = f64::from(self.motor_max);
        (max * y).round_ties_even().clamp(0.0, max) as u16
    }
}
