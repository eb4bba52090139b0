//! C17 smoke test: does the kernel reach the end of C1-C4 bring-up
//! (frame allocator, paging, `kmalloc`) without panicking? Everything up
//! through `mm::init` runs in the shared boot trampoline before
//! [`kernel_test_main`] is even called, so reaching this function at all
//! is most of the assertion.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::vec::Vec;

use coal_kernel::{serial_print, serial_println};

#[path = "common/mod.rs"]
mod common;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    coal_kernel::test_support::test_panic_handler(info)
}

#[unsafe(no_mangle)]
extern "C" fn kernel_test_main() -> ! {
    serial_println!("boot_smoke: kernel reached test entry");

    test_heap_allocates();
    test_logging_is_installed();

    serial_println!("boot_smoke: all checks passed");
    coal_kernel::test_support::exit_qemu(coal_kernel::test_support::QemuExitCode::Success)
}

fn test_heap_allocates() {
    serial_print!("test_heap_allocates...\t");
    let mut v: Vec<u32> = Vec::new();
    for i in 0..256 {
        v.push(i);
    }
    assert_eq!(v.len(), 256);
    assert_eq!(v[255], 255);
    drop(v);
    serial_println!("[ok]");
}

fn test_logging_is_installed() {
    serial_print!("test_logging_is_installed...\t");
    log::info!("boot_smoke: log sink reachable");
    serial_println!("[ok]");
}
