//! Kernel print utilities.
//!
//! [`print!`] and [`println!`] write straight to the machine console. The
//! leveled macros ([`info!`], [`warning!`], [`debug!`]) go through the `log`
//! facade and are rendered by [`KernelLogger`] once [`init_logger`] has been
//! called. All leveled output is suppressed while [`QUITE`] is set.
//!
//! [`QUITE`]: crate::QUITE
use crate::spinlock::SpinLock;
use std::sync::atomic::Ordering;

static CONSOLE: SpinLock<()> = SpinLock::new(());

#[doc(hidden)]
pub fn _print(fmt: std::fmt::Arguments<'_>) {
    let guard = CONSOLE.lock();
    std::print!("{fmt}");
    guard.unlock();
}

#[doc(hidden)]
pub use log as __log;

/// Prints out the message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::kprint::__log::info!($($arg)*));
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => ($crate::kprint::__log::warn!($($arg)*));
}

/// Display a debug message.
///
/// Debug messages are only rendered when the logger runs at
/// [`log::LevelFilter::Debug`] or above.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => ($crate::kprint::__log::debug!($($arg)*));
}

/// The `log` backend of the kernel.
///
/// Renders records as `[LEVEL] message` lines on the machine console.
pub struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        !crate::QUITE.load(Ordering::SeqCst) && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let tag = match record.level() {
                log::Level::Error => "ERROR",
                log::Level::Warn => "WARN",
                log::Level::Info => "INFO",
                log::Level::Debug => "DEBUG",
                log::Level::Trace => "TRACE",
            };
            crate::println!("[{tag}] {}", record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Installs [`KernelLogger`] as the global logger and sets the maximum level.
///
/// Installing twice is harmless; only the level is updated.
pub fn init_logger(level: log::LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
