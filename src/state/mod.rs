// Shared per-robot state
// store: latest state per robot for the liveness monitor (single lock)
// staging: latest sample per robot for the frame logger (per-entry locks)
pub mod staging;
pub mod store;
