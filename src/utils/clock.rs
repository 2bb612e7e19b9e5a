//! Wall-clock time in UNIX seconds, and sleeps that give up when the run flag drops.

use std::{
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crate::pipeline::shutdown::RunFlag;

/// Longest single sleep slice, bounds cancellation latency.
const SLICE: Duration = Duration::from_millis(50);

pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Sleep for `total`, waking every 50 ms to check `running`.
/// Returns false if the flag dropped before the time was up.
pub fn sleep_while_running(running: &RunFlag, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while running.is_running() {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLICE));
    }
    false
}
