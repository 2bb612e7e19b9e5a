//! frame_logger.rs
//! Writes one CSV row per frame (1/24 s) for the whole population.
//!
//! - Emission is decoupled from wake-ups: each wake emits every frame whose
//!   deadline has passed, so stalls produce a burst of correctly stamped rows
//!   rather than gaps. Frame k is stamped `t0 + k·Δ`.
//! - Freshness is judged against wall-clock `now` at emission, not the frame's
//!   nominal time: during a catch-up burst a fresh sample repeats across the
//!   burst, and a stale one is zero-filled in all of it.
//! - `LogSink` guards the CSV writer. A frame is read from the staging buffer
//!   and written while holding the sink lock, so a concurrent close never
//!   splits a row.

use std::{
    io::Write,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::error::LogError;
use crate::pipeline::shutdown::RunFlag;
use crate::state::staging::{BufferedSample, StagingBuffer};
use crate::utils::clock::unix_now;

/// Four columns per robot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RobotColumns {
    pub sensor_left: f64,
    pub sensor_right: f64,
    pub motor_left: u16,
    pub motor_right: u16,
}

impl RobotColumns {
    /// Zero-fill absent or stale samples.
    pub fn from_sample(sample: Option<BufferedSample>, now: f64, staleness: f64) -> Self {
        match sample {
            Some(s) if s.age(now) <= staleness => Self {
                sensor_left: s.sensors.left,
                sensor_right: s.sensors.right,
                motor_left: s.motors.left,
                motor_right: s.motors.right,
            },
            _ => Self::default(),
        }
    }
}

/// One CSV row; the robot columns serialize flat after the timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub timestamp: f64,
    pub robots: Vec<RobotColumns>,
}

pub fn header(num_robots: usize) -> Vec<String> {
    let mut columns = vec!["timestamp".to_string()];
    for i in 0..num_robots {
        columns.push(format!("robot{i}_sensor_left"));
        columns.push(format!("robot{i}_sensor_right"));
        columns.push(format!("robot{i}_motor_left"));
        columns.push(format!("robot{i}_motor_right"));
    }
    columns
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Written,
    Closed,
}

/// Tracks an ongoing failure so it is logged once, not on every attempt.
#[derive(Debug, Default)]
struct FailureLatch {
    failing: bool,
}

impl FailureLatch {
    /// True on the transition into failure.
    fn fail(&mut self) -> bool {
        !std::mem::replace(&mut self.failing, true)
    }

    /// True on the transition out of failure.
    fn recover(&mut self) -> bool {
        std::mem::replace(&mut self.failing, false)
    }
}

struct SinkInner {
    writer: Option<csv::Writer<Box<dyn Write + Send>>>,
    unflushed: u64,
    flush_failure: FailureLatch,
}

/// The persisted record stream. Created once, closed once.
pub struct LogSink {
    inner: Mutex<SinkInner>,
    flush_every: u64,
}

impl LogSink {
    /// Wrap `out` and write the header row.
    pub fn new(out: Box<dyn Write + Send>, num_robots: usize, flush_every: u64) -> Result<Self, LogError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
        writer.write_record(header(num_robots))?;
        writer.flush()?;
        Ok(Self {
            inner: Mutex::new(SinkInner {
                writer: Some(writer),
                unflushed: 0,
                flush_failure: FailureLatch::default(),
            }),
            flush_every: flush_every.max(1),
        })
    }

    /// Build a record under the sink lock and append it.
    /// `build` only runs if the sink is still open.
    ///
    /// `Err` means the row was not written. Once written, the row counts even
    /// if the periodic flush fails: that is logged and retried on the next row.
    pub fn append_with<F>(&self, build: F) -> Result<Append, LogError>
    where
        F: FnOnce() -> FrameRecord,
    {
        let mut inner = self.inner.lock();
        let SinkInner {
            writer,
            unflushed,
            flush_failure,
        } = &mut *inner;
        let Some(writer) = writer.as_mut() else {
            return Ok(Append::Closed);
        };

        writer.serialize(build())?;
        *unflushed += 1;
        if *unflushed >= self.flush_every {
            match writer.flush() {
                Ok(()) => {
                    *unflushed = 0;
                    if flush_failure.recover() {
                        info!("CSV flush recovered");
                    }
                }
                Err(e) => {
                    if flush_failure.fail() {
                        error!("CSV flush failed, retrying with the next frame: {e}");
                    }
                }
            }
        }
        Ok(Append::Written)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().writer.is_none()
    }

    /// Flush and drop the writer. Returns `Ok(false)` if already closed.
    pub fn close(&self) -> Result<bool, LogError> {
        let writer = self.inner.lock().writer.take();
        match writer {
            Some(mut writer) => {
                writer.flush()?;
                // dropping the csv writer releases the underlying file
                drop(writer);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Deadline bookkeeping for the frame sequence.
#[derive(Debug, Clone, Copy)]
pub struct FrameSchedule {
    origin: f64,
    interval: f64,
    next_index: u64,
}

impl FrameSchedule {
    pub fn new(origin: f64, interval: f64) -> Self {
        Self {
            origin,
            interval,
            next_index: 0,
        }
    }

    pub fn next_time(&self) -> f64 {
        self.origin + self.next_index as f64 * self.interval
    }

    pub fn emitted(&self) -> u64 {
        self.next_index
    }

    /// Timestamp of the next due frame, advancing past it.
    pub fn take_due(&mut self, now: f64) -> Option<f64> {
        let t = self.next_time();
        if t <= now {
            self.next_index += 1;
            Some(t)
        } else {
            None
        }
    }
}

pub struct FrameLogger {
    sink: Arc<LogSink>,
    staging: Arc<StagingBuffer>,
    interval: f64,
    staleness: f64,
    schedule: Option<FrameSchedule>,
}

impl FrameLogger {
    pub fn new(sink: Arc<LogSink>, staging: Arc<StagingBuffer>, interval: f64, staleness: f64) -> Self {
        Self {
            sink,
            staging,
            interval,
            staleness,
            schedule: None,
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.schedule.map(|s| s.emitted()).unwrap_or(0)
    }

    /// One wake-up: emit every frame due at `now`. The first call fixes `t0 = now`.
    /// Returns how many rows were written, or `Append::Closed` once the sink is gone.
    pub fn pump(&mut self, now: f64) -> Result<(usize, Append), LogError> {
        let interval = self.interval;
        let schedule = self
            .schedule
            .get_or_insert_with(|| FrameSchedule::new(now, interval));

        let mut written = 0;
        loop {
            // peek first so a closed sink doesn't consume a frame
            if schedule.next_time() > now {
                return Ok((written, Append::Written));
            }
            let frame_time = schedule.next_time();
            let status = self.sink.append_with(|| FrameRecord {
                timestamp: frame_time,
                robots: self
                    .staging
                    .read_all()
                    .into_iter()
                    .map(|(_, sample)| RobotColumns::from_sample(sample, now, self.staleness))
                    .collect(),
            })?;
            if status == Append::Closed {
                return Ok((written, Append::Closed));
            }
            schedule.take_due(now);
            written += 1;
        }
    }

    /// Wake every Δ/2 until the run flag drops or the sink is closed.
    pub fn run(mut self, running: RunFlag) {
        let wake = Duration::from_secs_f64(self.interval / 2.0);
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_wake = Instant::now();
        let mut write_failure = FailureLatch::default();

        while running.is_running() {
            match self.pump(unix_now()) {
                Ok((_, Append::Written)) => {
                    if write_failure.recover() {
                        info!("[FrameLogger] writing frames again");
                    }
                }
                Ok((_, Append::Closed)) => {
                    debug!("[FrameLogger] sink closed");
                    break;
                }
                // keep going: the next frame may succeed, and frames stay in order
                Err(e) => {
                    if write_failure.fail() {
                        error!("[FrameLogger] failed to write frame: {e}");
                    } else {
                        debug!("[FrameLogger] still failing: {e}");
                    }
                }
            }

            next_wake += wake;
            let now = Instant::now();
            if now < next_wake {
                sleeper.sleep(next_wake - now);
            } else {
                next_wake = now;
            }
        }
        info!("[FrameLogger] stopped after {} frames", self.frames_emitted());
    }

    /// Run on a dedicated thread at the highest priority the OS grants.
    pub fn spawn(self, running: RunFlag) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("frame-logger".to_string())
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    warn!("[FrameLogger] running at default priority: {e:?}");
                }
                self.run(running);
            })
    }
}
