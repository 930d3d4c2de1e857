use crate::{ConsoleSink, console_fmt, console_print};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing `[LEVEL] target: message` lines to the console.
///
/// Filtering uses the global `log::max_level`, so the level can be raised or
/// lowered after init.
pub struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl ConsoleLogger {
    /// Installs `sink` and registers the logger. Call once during early init.
    ///
    /// # Errors
    /// Fails if another logger was registered first; the sink is installed
    /// regardless.
    pub fn init(sink: ConsoleSink, level: LevelFilter) -> Result<(), SetLoggerError> {
        console_fmt::set_sink(sink);
        log::set_logger(&LOGGER)?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        console_print!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}
