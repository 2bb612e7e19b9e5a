//! Whole pipeline over the in-process transport: handler threads, frame
//! logger, and the shutdown sequence writing into an in-memory CSV.

use std::{
    io::{self, Write},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use phototaxis_controller::{
    FrameLogger, LogSink, MotorCommand, PhototaxisLaw, RobotHandler, RobotStateStore, RunFlag,
    ShutdownSequencer, StagingBuffer,
    pipeline::frame_logger::Append,
    transport::{
        InboundMessage, OutboundMessage, Value,
        channel::{ChannelSink, ChannelSource},
    },
    utils::clock::unix_now,
};

const N: usize = 3;
const DT: f64 = 1.0 / 24.0;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn robot_columns(row: &csv::StringRecord, robot: usize) -> Vec<&str> {
    row.iter().skip(1 + 4 * robot).take(4).collect()
}

#[test]
fn sensors_in_motors_out_frames_recorded_then_stopped() {
    let store = Arc::new(RobotStateStore::new(N));
    let staging = Arc::new(StagingBuffer::new(N));
    let (outbound, commands) = ChannelSink::new(N);
    let outbound = Arc::new(outbound);
    let buf = SharedBuf::default();
    let sink = Arc::new(LogSink::new(Box::new(buf.clone()), N, 1).unwrap());
    let running = RunFlag::new();

    let mut senders = Vec::new();
    let mut handles = Vec::new();
    for id in 0..N {
        let (tx, source) = ChannelSource::pair(16);
        let handler = RobotHandler::new(
            id,
            PhototaxisLaw::new(200, 8.0),
            store.clone(),
            staging.clone(),
            outbound.clone(),
            None,
        );
        handles.push(
            handler
                .spawn(Box::new(source), running.clone(), Duration::from_millis(10))
                .unwrap(),
        );
        senders.push(tx);
    }

    // robot 2 stays silent; robot 1 also sends junk that must be dropped
    senders[0].send(InboundMessage::sensor(0.0, 0.0)).unwrap();
    senders[1]
        .send(InboundMessage {
            address: "/sensor".into(),
            args: vec![Value::Float(1.0)],
        })
        .unwrap();
    senders[1].send(InboundMessage::sensor(10.0, 0.0)).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        store.get(0).and_then(|s| s.last_update).is_some()
            && store.get(1).and_then(|s| s.last_update).is_some()
            && commands.len() == 2
    }));
    assert_eq!(store.get(1).unwrap().motors, MotorCommand { left: 0, right: 200 });
    assert!(store.get(2).unwrap().last_update.is_none());

    let mut logger = FrameLogger::new(sink.clone(), staging.clone(), DT, 0.5);
    let t0 = unix_now();
    assert_eq!(logger.pump(t0).unwrap(), (1, Append::Written));
    assert_eq!(logger.pump(t0 + 2.5 * DT).unwrap(), (2, Append::Written));

    let sequencer = ShutdownSequencer::new(
        running.clone(),
        outbound.clone(),
        sink.clone(),
        N,
        false,
        3,
        Duration::ZERO,
    );
    let report = sequencer.trigger("test").unwrap();
    assert_eq!(report.robots_stopped, N);
    assert!(report.log_closed);
    assert!(sequencer.trigger("exit").is_none());

    // nothing more reaches the file once it is closed
    assert_eq!(logger.pump(t0 + 10.0).unwrap(), (0, Append::Closed));

    let handled: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(handled, vec![1, 1, 0]);

    // the control replies come first, then three stops per robot
    let sent: Vec<_> = commands.try_iter().collect();
    let replies: Vec<_> = sent.iter().take(2).copied().collect();
    assert!(replies.contains(&(0, OutboundMessage::Motor { left: 100, right: 100 })));
    assert!(replies.contains(&(1, OutboundMessage::Motor { left: 0, right: 200 })));
    let stops = &sent[2..];
    assert_eq!(stops.len(), 3 * N);
    assert!(stops
        .iter()
        .all(|(_, m)| *m == OutboundMessage::Motor { left: 0, right: 0 }));

    let bytes = buf.0.lock().clone();
    let mut reader = csv::ReaderBuilder::new().from_reader(bytes.as_slice());
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.len(), 1 + 4 * N);
    assert_eq!(&headers[0], "timestamp");
    assert_eq!(&headers[5], "robot1_sensor_left");

    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);
    for (k, row) in rows.iter().enumerate() {
        let ts: f64 = row[0].parse().unwrap();
        assert!((ts - (t0 + k as f64 * DT)).abs() < 1e-6);
        assert_eq!(robot_columns(row, 0), ["0.0", "0.0", "100", "100"]);
        assert_eq!(robot_columns(row, 1), ["10.0", "0.0", "0", "200"]);
        assert_eq!(robot_columns(row, 2), ["0.0", "0.0", "0", "0"]);
    }
}

#[test]
fn handler_exits_when_its_source_closes() {
    let (outbound, _commands) = ChannelSink::new(1);
    let handler = RobotHandler::new(
        0,
        PhototaxisLaw::new(200, 8.0),
        Arc::new(RobotStateStore::new(1)),
        Arc::new(StagingBuffer::new(1)),
        Arc::new(outbound),
        None,
    );
    let (tx, source) = ChannelSource::pair(4);
    let running = RunFlag::new();
    let handle = handler
        .spawn(Box::new(source), running.clone(), Duration::from_millis(10))
        .unwrap();

    tx.send(InboundMessage::sensor(5.0, 5.0)).unwrap();
    drop(tx);
    assert_eq!(handle.join().unwrap(), 1);
    // the rest of the process keeps running
    assert!(running.is_running());
}
