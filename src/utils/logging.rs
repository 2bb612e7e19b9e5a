//! Operational log stream: env_logger on stderr, `info` unless `RUST_LOG` says otherwise.

use env_logger::{Builder, Env};

pub fn init_logging() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_target(false)
        .try_init();
}
