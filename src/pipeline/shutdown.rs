//! shutdown.rs
//! Process-wide cancellation and the one-time teardown.
//!
//! `RunFlag` is the only cancellation signal: handlers, the frame logger and the
//! monitor poll it and leave their loops on the next iteration.
//!
//! `ShutdownSequencer::trigger` may be called from the signal path and the normal
//! exit path, concurrently. The first caller flips the flag and does the work:
//! 1. stop all periodic loops (flag)
//! 2. send `/motor [0, 0]` to every robot `stop_repeats` times
//! 3. flush and close the CSV sink
//! 4. log completion
//!
//! Later callers return immediately. Handlers send inside
//! `RunFlag::while_running`, so once the flag is down no motor command can
//! follow the stop broadcast.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{error, info};
use parking_lot::RwLock;

use crate::pipeline::frame_logger::LogSink;
use crate::transport::{CommandSink, OutboundMessage};
use crate::{MotorCommand, RobotId};

#[derive(Debug)]
struct RunState {
    running: AtomicBool,
    // held shared by handlers across check-and-send, exclusively by `stop`
    gate: RwLock<()>,
}

#[derive(Clone, Debug)]
pub struct RunFlag(Arc<RunState>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(RunState {
            running: AtomicBool::new(true),
            gate: RwLock::new(()),
        }))
    }

    pub fn is_running(&self) -> bool {
        self.0.running.load(Ordering::Acquire)
    }

    /// Returns true only for the call that actually stopped it.
    /// Waits for every `while_running` section in progress to finish, so
    /// nothing they send can arrive after what the stopper sends next.
    pub fn stop(&self) -> bool {
        let _gate = self.0.gate.write();
        self.0
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Run `f` only if still running, with `stop` held off until it returns.
    /// `None` once stopped.
    pub fn while_running<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let _gate = self.0.gate.read();
        self.is_running().then(f)
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    pub robots_stopped: usize,
    pub robots_failed: usize,
    pub log_closed: bool,
}

pub struct ShutdownSequencer {
    running: RunFlag,
    outbound: Arc<dyn CommandSink>,
    sink: Arc<LogSink>,
    num_robots: usize,
    stop_led: bool,
    repeats: u32,
    delay: Duration,
}

impl ShutdownSequencer {
    pub fn new(
        running: RunFlag,
        outbound: Arc<dyn CommandSink>,
        sink: Arc<LogSink>,
        num_robots: usize,
        stop_led: bool,
        repeats: u32,
        delay: Duration,
    ) -> Self {
        Self {
            running,
            outbound,
            sink,
            num_robots,
            stop_led,
            repeats,
            delay,
        }
    }

    /// Run the teardown once. `None` if another caller already did.
    pub fn trigger(&self, reason: &str) -> Option<StopReport> {
        if !self.running.stop() {
            return None;
        }
        info!("Shutting down controller ({reason})...");

        let (robots_stopped, robots_failed) = self.send_stop_signals();
        let log_closed = match self.sink.close() {
            Ok(true) => {
                info!("CSV log file closed");
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!("Error while closing CSV file: {e}");
                false
            }
        };

        info!("Shutdown complete.");
        Some(StopReport {
            robots_stopped,
            robots_failed,
            log_closed,
        })
    }

    fn send_stop_signals(&self) -> (usize, usize) {
        info!("Sending stop signals to all robots...");
        let (mut stopped, mut failed) = (0, 0);
        for robot in 0..self.num_robots {
            match self.stop_robot(robot) {
                Ok(()) => {
                    stopped += 1;
                    info!("Stop signal sent to robot {robot}");
                }
                Err(e) => {
                    failed += 1;
                    error!("Failed to send stop signal to robot {robot}: {e}");
                }
            }
        }
        (stopped, failed)
    }

    /// Gives up on this robot at its first failed send.
    fn stop_robot(&self, robot: RobotId) -> Result<(), crate::transport::TransportError> {
        let stop = OutboundMessage::Motor {
            left: MotorCommand::STOP.left,
            right: MotorCommand::STOP.right,
        };
        let led_off = OutboundMessage::Led { r: 0, g: 0, b: 0 };
        for _ in 0..self.repeats {
            self.outbound.send(robot, &stop)?;
            if self.stop_led {
                self.outbound.send(robot, &led_off)?;
            }
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, channel::ChannelSink};
    use parking_lot::Mutex;
    use std::{io, io::Write};

    struct CountingWriter(Arc<Mutex<usize>>);

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            *self.0.lock() += 1;
            Ok(())
        }
    }

    /// Fails every send to one robot.
    struct FlakySink {
        broken: RobotId,
        population: usize,
        sent: Mutex<Vec<(RobotId, OutboundMessage)>>,
    }

    impl CommandSink for FlakySink {
        fn send(&self, robot: RobotId, msg: &OutboundMessage) -> Result<(), TransportError> {
            if robot == self.broken {
                return Err(TransportError::Io(io::Error::other("host unreachable")));
            }
            self.sent.lock().push((robot, *msg));
            Ok(())
        }
        fn population(&self) -> usize {
            self.population
        }
    }

    fn sink() -> (Arc<LogSink>, Arc<Mutex<usize>>) {
        let flushes = Arc::new(Mutex::new(0));
        let sink = LogSink::new(Box::new(CountingWriter(flushes.clone())), 2, 100).unwrap();
        (Arc::new(sink), flushes)
    }

    #[test]
    fn run_flag_stops_once() {
        let flag = RunFlag::new();
        let other = flag.clone();
        assert!(flag.is_running());
        assert!(other.stop());
        assert!(!flag.stop());
        assert!(!flag.is_running());
    }

    #[test]
    fn second_trigger_is_a_no_op() {
        let (outbound, rx) = ChannelSink::new(3);
        let (log, flushes) = sink();
        let running = RunFlag::new();
        let seq = ShutdownSequencer::new(running.clone(), Arc::new(outbound), log.clone(), 3, false, 3, Duration::ZERO);

        let report = seq.trigger("test").unwrap();
        assert_eq!(
            report,
            StopReport {
                robots_stopped: 3,
                robots_failed: 0,
                log_closed: true
            }
        );
        assert!(!running.is_running());
        assert!(log.is_closed());
        let flushes_after_first = *flushes.lock();

        assert!(seq.trigger("again").is_none());
        assert_eq!(*flushes.lock(), flushes_after_first);

        let sent: Vec<_> = rx.try_iter().collect();
        assert_eq!(sent.len(), 9);
        for robot in 0..3 {
            let to_robot = sent.iter().filter(|(r, _)| *r == robot).count();
            assert_eq!(to_robot, 3);
        }
        assert!(sent
            .iter()
            .all(|(_, m)| *m == OutboundMessage::Motor { left: 0, right: 0 }));
    }

    #[test]
    fn led_is_switched_off_with_each_stop() {
        let (outbound, rx) = ChannelSink::new(1);
        let (log, _) = sink();
        let seq = ShutdownSequencer::new(RunFlag::new(), Arc::new(outbound), log, 1, true, 2, Duration::ZERO);
        seq.trigger("test").unwrap();
        let sent: Vec<_> = rx.try_iter().map(|(_, m)| m).collect();
        assert_eq!(
            sent,
            vec![
                OutboundMessage::Motor { left: 0, right: 0 },
                OutboundMessage::Led { r: 0, g: 0, b: 0 },
                OutboundMessage::Motor { left: 0, right: 0 },
                OutboundMessage::Led { r: 0, g: 0, b: 0 },
            ]
        );
    }

    #[test]
    fn a_failing_robot_does_not_abort_the_broadcast() {
        let flaky = Arc::new(FlakySink {
            broken: 1,
            population: 3,
            sent: Mutex::new(Vec::new()),
        });
        let (log, _) = sink();
        let seq = ShutdownSequencer::new(RunFlag::new(), flaky.clone(), log, 3, false, 3, Duration::ZERO);
        let report = seq.trigger("test").unwrap();
        assert_eq!(report.robots_stopped, 2);
        assert_eq!(report.robots_failed, 1);
        assert!(report.log_closed);

        let sent = flaky.sent.lock();
        assert_eq!(sent.iter().filter(|(r, _)| *r == 0).count(), 3);
        assert_eq!(sent.iter().filter(|(r, _)| *r == 2).count(), 3);
    }

    /// Parks the first send until the test releases it.
    struct GatedSink {
        inner: ChannelSink,
        held: AtomicBool,
        entered: crossbeam::channel::Sender<()>,
        release: crossbeam::channel::Receiver<()>,
    }

    impl CommandSink for GatedSink {
        fn send(&self, robot: RobotId, msg: &OutboundMessage) -> Result<(), TransportError> {
            if !self.held.swap(true, Ordering::AcqRel) {
                let _ = self.entered.send(());
                let _ = self.release.recv();
            }
            self.inner.send(robot, msg)
        }
        fn population(&self) -> usize {
            self.inner.population()
        }
    }

    #[test]
    fn in_flight_motor_command_lands_before_the_stops() {
        use crate::pipeline::handler::RobotHandler;
        use crate::state::{staging::StagingBuffer, store::RobotStateStore};
        use crate::transport::{InboundMessage, channel::ChannelSource};
        use crate::PhototaxisLaw;
        use crossbeam::channel::bounded;

        let (inner, rx) = ChannelSink::new(1);
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let outbound = Arc::new(GatedSink {
            inner,
            held: AtomicBool::new(false),
            entered: entered_tx,
            release: release_rx,
        });
        let running = RunFlag::new();
        let (log, _) = sink();

        let handler = RobotHandler::new(
            0,
            PhototaxisLaw::new(200, 8.0),
            Arc::new(RobotStateStore::new(1)),
            Arc::new(StagingBuffer::new(1)),
            outbound.clone(),
            None,
        );
        let (tx, source) = ChannelSource::pair(4);
        let worker = handler
            .spawn(Box::new(source), running.clone(), Duration::from_millis(10))
            .unwrap();
        tx.send(InboundMessage::sensor(0.0, 0.0)).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // the handler is parked mid-send; shutdown must wait for it
        let seq = ShutdownSequencer::new(running.clone(), outbound, log, 1, false, 3, Duration::ZERO);
        let stopper = thread::spawn(move || seq.trigger("test"));
        thread::sleep(Duration::from_millis(50));
        assert!(!stopper.is_finished());
        assert!(rx.is_empty());

        release_tx.send(()).unwrap();
        assert!(stopper.join().unwrap().is_some());
        assert_eq!(worker.join().unwrap(), 1);

        // anything queued after the stop produces no command
        let _ = tx.send(InboundMessage::sensor(5.0, 0.0));
        let sent: Vec<_> = rx.try_iter().map(|(_, m)| m).collect();
        assert_eq!(
            sent,
            vec![
                OutboundMessage::Motor { left: 100, right: 100 },
                OutboundMessage::Motor { left: 0, right: 0 },
                OutboundMessage::Motor { left: 0, right: 0 },
                OutboundMessage::Motor { left: 0, right: 0 },
            ]
        );
    }

    #[test]
    fn while_running_refuses_after_stop() {
        let flag = RunFlag::new();
        assert_eq!(flag.while_running(|| 7), Some(7));
        flag.stop();
        assert_eq!(flag.while_running(|| 7), None);
    }

    #[test]
    fn concurrent_triggers_run_the_sequence_once() {
        let (outbound, rx) = ChannelSink::new(4);
        let (log, _) = sink();
        let seq = Arc::new(ShutdownSequencer::new(
            RunFlag::new(),
            Arc::new(outbound),
            log,
            4,
            false,
            3,
            Duration::from_millis(1),
        ));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let seq = seq.clone();
                thread::spawn(move || seq.trigger(&format!("caller {i}")).is_some())
            })
            .collect();
        let winners = handles.into_iter().filter_map(|h| h.join().ok()).filter(|won| *won).count();

        assert_eq!(winners, 1);
        assert_eq!(rx.try_iter().count(), 4 * 3);
    }
}
