//! C17 integration test for C7's scheduler-adjacent bookkeeping:
//! per-task quantum assignment and priority inheritance. Stays off the
//! real `schedule()`/context-switch path on purpose — that only makes
//! sense mid-interrupt with a live "previous" context to save, which this
//! harness (still running on the boot thread when `kernel_test_main`
//! starts) never has.

#![no_std]
#![no_main]

extern crate alloc;

use coal_kernel::process::{self, create, INIT_PID};
use coal_kernel::sched::tcb::TaskState;
use coal_kernel::sched::{priority_inherit, scheduler};
use coal_kernel::{serial_print, serial_println};

#[path = "common/mod.rs"]
mod common;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    coal_kernel::test_support::test_panic_handler(info)
}

#[unsafe(no_mangle)]
extern "C" fn kernel_test_main() -> ! {
    common::install_test_init(0x0804_8000, &common::HALT_LOOP);
    process::init();
    scheduler::init();

    test_new_task_quantum_and_state();
    test_priority_inheritance_boosts_and_unwinds();
    test_zombie_removal();

    serial_println!("scheduler_tests: all checks passed");
    coal_kernel::test_support::exit_qemu(coal_kernel::test_support::QemuExitCode::Success)
}

fn test_new_task_quantum_and_state() {
    serial_print!("test_new_task_quantum_and_state...\t");
    let init_tcb = scheduler::lookup(INIT_PID).expect("init task registered");
    assert_eq!(init_tcb.state(), TaskState::Ready);
    assert!(init_tcb.ticks_remaining.load(core::sync::atomic::Ordering::Relaxed) > 0);
    assert!(init_tcb.in_run_queue.load(core::sync::atomic::Ordering::Relaxed));
    serial_println!("[ok]");
}

fn test_priority_inheritance_boosts_and_unwinds() {
    serial_print!("test_priority_inheritance_boosts_and_unwinds...\t");
    // A low-priority holder and a high-priority waiter, both children of
    // init so they're real, fully-formed tasks the scheduler knows about.
    let holder_pid = create::create_user_process("/bin/init", INIT_PID, 3).expect("spawn holder");
    let waiter_pid = create::create_user_process("/bin/init", INIT_PID, 0).expect("spawn waiter");
    let holder = scheduler::lookup(holder_pid).unwrap();
    let waiter = scheduler::lookup(waiter_pid).unwrap();
    assert_eq!(holder.effective_priority(), 3);
    assert_eq!(waiter.effective_priority(), 0);

    priority_inherit::add_blocked_task(&waiter, &holder);
    assert_eq!(
        holder.effective_priority(),
        0,
        "holder should inherit the waiter's higher priority"
    );

    priority_inherit::remove_blocked_task(waiter_pid, &holder);
    assert_eq!(
        holder.effective_priority(),
        3,
        "holder should fall back to its base priority once unblocked"
    );
    serial_println!("[ok]");
}

fn test_zombie_removal() {
    serial_print!("test_zombie_removal...\t");
    let pid = create::create_user_process("/bin/init", INIT_PID, 1).expect("spawn throwaway task");
    let tcb = scheduler::lookup(pid).unwrap();
    tcb.set_state(TaskState::Zombie);
    scheduler::remove_task(pid);
    assert!(scheduler::lookup(pid).is_none());
    serial_println!("[ok]");
}
