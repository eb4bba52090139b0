//! Page fault entry point (vector 14): decode CR2 + the hardware error
//! code, then hand off to the faulting address space's VMA tree (C5).

use crate::arch::x86::idt::IsrFrame;
use crate::error::KernelPanic;

use super::vma::FaultOutcome;

const ERR_PRESENT: u32 = 1 << 0;
const ERR_WRITE: u32 = 1 << 1;
const ERR_USER: u32 = 1 << 2;
const ERR_RESERVED: u32 = 1 << 3;
const ERR_INSTRUCTION_FETCH: u32 = 1 << 4;

fn read_cr2() -> u32 {
    let cr2: u32;
    unsafe {
        core::arch::asm!("mov {0}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
    }
    cr2
}

/// Called from [`crate::arch::x86::idt::dispatch`] for vector 14.
pub fn handle(frame: &mut IsrFrame) {
    let fault_addr = read_cr2();
    let user_mode = frame.cs & 0x3 != 0;
    let write = frame.error_code & ERR_WRITE != 0;
    let exec = frame.error_code & ERR_INSTRUCTION_FETCH != 0;
    let present = frame.error_code & ERR_PRESENT != 0;

    if frame.error_code & ERR_RESERVED != 0 {
        panic!("page fault with reserved bit set at cr2={fault_addr:#010x}");
    }

    if !user_mode {
        // A kernel-mode fault is either a genuine bug, or a user-pointer
        // copy in C8's uaccess path that installed a fault recovery
        // landing pad before touching user memory.
        if crate::syscall::uaccess::try_recover_fault(frame) {
            return;
        }
        panic!(
            "unrecoverable kernel-mode page fault at cr2={fault_addr:#010x} eip={:#010x} \
             (present={present} write={write} exec={exec})",
            { frame.eip }
        );
    }

    debug_assert_eq!(frame.error_code & ERR_USER, ERR_USER, "expected user-mode fault bit set");

    let Some(mm) = crate::process::current_mm() else {
        panic!("user-mode page fault with no current address space: {}", KernelPanic("no mm_struct"));
    };

    match mm.handle_fault(fault_addr, write, exec) {
        FaultOutcome::Resolved => {}
        FaultOutcome::OutOfMemory => {
            log::warn!(
                "pid {:?}: out of memory servicing fault at {fault_addr:#010x}",
                crate::sched::scheduler::current_pid()
            );
            crate::process::lifecycle::kill_current(crate::process::lifecycle::ExitReason::OutOfMemory);
        }
        FaultOutcome::Killed => {
            log::warn!(
                "pid {:?}: segmentation fault at {fault_addr:#010x} (write={write} exec={exec})",
                crate::sched::scheduler::current_pid()
            );
            crate::process::lifecycle::kill_current(crate::process::lifecycle::ExitReason::SegmentationFault);
        }
    }
}
