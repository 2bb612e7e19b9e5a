// Concurrent pipeline
// handler: one thread per robot, /sensor -> control law -> state -> /motor
// frame_logger: frame-paced CSV rows from the staging buffer
// monitor: silence warnings from the state store
// shutdown: run flag + one-time stop broadcast and log close
pub mod frame_logger;
pub mod handler;
pub mod monitor;
pub mod shutdown;
