/*
Handlers write their robot's entry in both shared structures while the
frame logger and monitor read all entries. This measures how the single-lock
state store and the per-robot staging buffer scale as writer threads grow,
with one reader thread sweeping the whole population alongside them.
*/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::{
    hint::black_box,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use phototaxis_controller::{MotorCommand, RobotStateStore, SensorReading, StagingBuffer};

//Writer threads, one per simulated robot
const THREAD_COUNTS: &[usize] = &[2, 4, 8, 16];

//Updates each writer performs per iteration
const OPS_PER_THREAD: usize = 20_000;

trait SharedState: Send + Sync + 'static {
    fn write(&self, id: usize, now: f64);
    fn sweep(&self) -> usize;
}

impl SharedState for RobotStateStore {
    fn write(&self, id: usize, now: f64) {
        self.update(id, SensorReading { left: now, right: now }, MotorCommand::STOP, now);
    }
    fn sweep(&self) -> usize {
        self.snapshot_all().len()
    }
}

impl SharedState for StagingBuffer {
    fn write(&self, id: usize, now: f64) {
        self.stage(id, SensorReading { left: now, right: now }, MotorCommand::STOP, now);
    }
    fn sweep(&self) -> usize {
        self.read_all().len()
    }
}

fn contend<S: SharedState>(state: Arc<S>, threads: usize) {
    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let (state, done) = (state.clone(), done.clone());
        thread::spawn(move || {
            let mut sweeps = 0usize;
            while !done.load(Ordering::Relaxed) {
                sweeps += black_box(state.sweep());
            }
            sweeps
        })
    };

    let writers: Vec<_> = (0..threads)
        .map(|id| {
            let state = state.clone();
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    state.write(black_box(id), i as f64);
                }
            })
        })
        .collect();
    for h in writers {
        let _ = h.join();
    }
    done.store(true, Ordering::Relaxed);
    let _ = reader.join();
}

fn bench_state_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_contention");

    for &threads in THREAD_COUNTS {
        group.bench_with_input(BenchmarkId::new("store", threads), &threads, |b, &threads| {
            let store = Arc::new(RobotStateStore::new(threads));
            b.iter(|| contend(store.clone(), threads));
        });
        group.bench_with_input(BenchmarkId::new("staging", threads), &threads, |b, &threads| {
            let staging = Arc::new(StagingBuffer::new(threads));
            b.iter(|| contend(staging.clone(), threads));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_state_contention);
criterion_main!(benches);
