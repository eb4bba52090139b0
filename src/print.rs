//! Kernel logging (C14): a [`log::Log`] implementation with two sinks —
//! the serial port, always, and the VGA console, only for `Warn` and above
//! so routine `Info`/`Debug` traffic doesn't scroll the screen the user is
//! watching.

use core::fmt::Write as _;

use log::{LevelFilter, Metadata, Record};

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = record.level();
        crate::arch::x86::serial::write_fmt(format_args!(
            "[{level:<5}] {target}: {args}\n",
            level = level,
            target = record.target(),
            args = record.args()
        ));
        if level <= log::Level::Warn {
            crate::arch::x86::vga::write_fmt(
                format_args!("[{level}] {args}\n", level = level, args = record.args()),
                true,
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the global logger with a permissive default level, so the
/// handful of log lines between this and boot config being parsed aren't
/// silently dropped. `x86_boot_main` narrows this to `BootConfig::log_level`
/// once the command line has been read. Must run after
/// [`crate::arch::x86::serial::init`].
pub fn init() {
    log::set_logger(&LOGGER).expect("logger already initialized");
    log::set_max_level(LevelFilter::Trace);
}

/// Backing implementation for the kernel's `println!`-style macro: normal
/// console output on fd 1/2, bypassing the leveled logger.
pub fn console_write_fmt(args: core::fmt::Arguments) {
    crate::arch::x86::vga::write_fmt(args, false);
    let mut serial_mirror = SerialMirror;
    serial_mirror.write_fmt(args).ok();
}

struct SerialMirror;

impl core::fmt::Write for SerialMirror {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        crate::arch::x86::serial::write_bytes(s.as_bytes());
        Ok(())
    }
}

/// Writes raw bytes to the console, without going through the
/// `core::fmt` machinery.
pub fn console_write_bytes(bytes: &[u8]) {
    crate::arch::x86::vga::write_bytes(bytes);
    crate::arch::x86::serial::write_bytes(bytes);
}

#[macro_export]
macro_rules! println {
    () => ($crate::print::console_write_fmt(format_args!("\n")));
    ($($arg:tt)*) => ($crate::print::console_write_fmt(format_args!("{}\n", format_args!($($arg)*))));
}
