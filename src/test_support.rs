//! C17: shared guest-side plumbing for the `harness = false` integration
//! binaries under `tests/`. Built only behind the `test-entry` feature so
//! the real kernel binary (`src/main.rs`) never carries this code.
//!
//! [`x86_boot_main`](crate::arch::x86::x86_boot_main) still owns the one
//! `_start` every binary linking this crate gets from
//! [`crate::arch::x86::boot`]'s trampoline; with `test-entry` on, it stops
//! short of launching `init` and the scheduler and instead calls
//! [`kernel_test_main`], which every `tests/*.rs` binary must define. This
//! is the same "shared entry symbol, test binary supplies the behaviour"
//! hook `#[panic_handler]`/`#[global_allocator]` use, just spelled out by
//! hand since there's only one of those per binary and we need one per
//! test.

/// QEMU's `isa-debug-exit` device: a byte written to port `0xf4` becomes
/// the process exit code as `(byte << 1) | 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Write `code` to the debug-exit port and never return; `scripts/run_qemu.sh`
/// maps the resulting QEMU process exit status back to pass/fail.
pub fn exit_qemu(code: QemuExitCode) -> ! {
    unsafe {
        crate::arch::x86::port::outb(0xf4, code as u32 as u8);
    }
    loop {
        crate::arch::hal::halt();
    }
}

/// A test binary's panic is a failed test, not a kernel bug: report it on
/// the serial line and exit QEMU with the failure code instead of the
/// ordinary `cli; hlt` the real panic handler (`src/main.rs`) uses.
pub fn test_panic_handler(info: &core::panic::PanicInfo) -> ! {
    serial_println!("[failed]");
    serial_println!("{info}");
    exit_qemu(QemuExitCode::Failed);
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::arch::x86::serial::write_fmt(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}

unsafe extern "C" {
    /// Defined by whichever `tests/*.rs` binary links this crate with
    /// `test-entry` on (as `#[unsafe(no_mangle)] extern "C" fn
    /// kernel_test_main() -> !`). Takes over after the ordinary subsystem
    /// bring-up (serial, logging, config, C1-C4 memory init) instead of
    /// `process::init`/`scheduler::run_idle`.
    fn kernel_test_main() -> !;
}

/// Called from [`crate::arch::x86::x86_boot_main`] in place of the real
/// boot tail when `test-entry` is enabled.
pub unsafe fn run_registered_test() -> ! {
    unsafe { kernel_test_main() }
}
