//! Console logger forwarding to `HAL::debug_write`.

use std::sync::Arc;

use log::{Level, LevelFilter, Log, Metadata, Record};
use mcore_hal::HAL;

struct HalLogger {
    hal: Arc<dyn HAL>,
    level: LevelFilter,
}

impl Log for HalLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => "31",
            Level::Warn => "33",
            Level::Info => "32",
            Level::Debug => "36",
            Level::Trace => "90",
        };
        let millis = self.hal.now_nanos() / 1_000_000;
        self.hal.debug_write(&format!(
            "[{:>6} ms] \x1b[{}m{:<5}\x1b[0m {}: {}",
            millis,
            color,
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// Install the logger for the lifetime of the process.
///
/// Returns `false` if a logger was already installed.
pub fn init(hal: Arc<dyn HAL>, level: LevelFilter) -> bool {
    let logger: &'static HalLogger = Box::leak(Box::new(HalLogger { hal, level }));
    if log::set_logger(logger).is_err() {
        return false;
    }
    log::set_max_level(level);
    true
}
