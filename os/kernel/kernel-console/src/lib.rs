//! # Kernel Console
//!
//! Text output for the proxy kernel. The platform code (HTIF, UART, ...)
//! installs a byte sink once during boot; everything else writes through
//! [`console_print!`] or the `log` facade backed by [`ConsoleLogger`].
//!
//! ```text
//! log::info!(..)        console_print!(..)
//!        ↓                     ↓
//!  ConsoleLogger  ──→  console_fmt::write
//!                              ↓
//!                 CONSOLE lock + ConsoleSink
//!                              ↓
//!                     HTIF / UART driver
//! ```
//!
//! Output before a sink is installed is dropped. Each formatted write holds the
//! console lock, so lines from different harts never interleave.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod logger;

pub use logger::ConsoleLogger;

/// Byte sink provided by the platform console driver.
pub type ConsoleSink = fn(&str);

#[doc(hidden)]
pub mod console_fmt {
    use crate::ConsoleSink;
    use core::fmt::{self, Write};
    use kernel_sync::SpinLock;

    static CONSOLE: SpinLock<Option<ConsoleSink>> = SpinLock::new(None);

    struct SinkWriter(ConsoleSink);

    impl Write for SinkWriter {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            (self.0)(s);
            Ok(())
        }
    }

    pub fn set_sink(sink: ConsoleSink) {
        *CONSOLE.lock() = Some(sink);
    }

    pub fn has_sink() -> bool {
        CONSOLE.lock().is_some()
    }

    pub fn write(args: fmt::Arguments) {
        let guard = CONSOLE.lock();
        if let Some(sink) = *guard {
            // best-effort output
            let _ = SinkWriter(sink).write_fmt(args);
        }
    }
}

/// Installs the console sink. A later call replaces the earlier sink.
pub fn set_sink(sink: ConsoleSink) {
    console_fmt::set_sink(sink);
}

#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {{
        $crate::console_fmt::write(core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! console_println {
    () => {
        $crate::console_print!("\n")
    };
    ($($arg:tt)*) => {{
        $crate::console_fmt::write(core::format_args!("{}\n", core::format_args!($($arg)*)));
    }};
}
