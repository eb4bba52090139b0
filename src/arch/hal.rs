//! Hardware abstraction surface (C13): the handful of operations the rest
//! of the kernel needs from the CPU/platform without caring about the
//! concrete architecture. Only i686 is implemented; this module is the
//! seam a second architecture would plug into.

use core::arch::asm;
use core::sync::atomic::{AtomicBool, Ordering};

/// Disable interrupts, run `f`, restore the prior interrupt-enable state.
///
/// Nests correctly: an inner call never re-enables interrupts an outer
/// caller had deliberately disabled.
pub fn without_interrupts<F: FnOnce() -> R, R>(f: F) -> R {
    let was_enabled = interrupts_enabled();
    if was_enabled {
        disable_interrupts();
    }
    let result = f();
    if was_enabled {
        enable_interrupts();
    }
    result
}

fn interrupts_enabled() -> bool {
    let flags: u32;
    unsafe {
        asm!(
            "pushfd",
            "pop {0}",
            out(reg) flags,
            options(nomem, preserves_flags),
        );
    }
    flags & 0x200 != 0
}

pub fn enable_interrupts() {
    unsafe { asm!("sti", options(nomem, nostack)) };
}

pub fn disable_interrupts() {
    unsafe { asm!("cli", options(nomem, nostack)) };
}

/// Halt the CPU until the next interrupt; used by the idle task.
pub fn halt() {
    unsafe { asm!("hlt", options(nomem, nostack)) };
}

/// Invalidate a single page's TLB entry after its page-table entry changes.
pub fn flush_tlb_page(virt_addr: usize) {
    unsafe {
        asm!("invlpg [{0}]", in(reg) virt_addr, options(nostack));
    }
}

/// Reload CR3 to flush the entire TLB, used on an address-space switch
/// where the outgoing and incoming tasks belong to different processes.
pub fn flush_tlb_all() {
    unsafe {
        asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack),
        );
    }
}

/// Reload CR3 with a new top-level page directory, switching address
/// spaces wholesale on a context switch between two different processes.
///
/// # Safety
/// `phys` must be a valid, fully-populated page directory physical
/// address (kernel half present) or every subsequent memory access traps.
pub unsafe fn load_cr3(phys: u32) {
    asm!("mov cr3, {0}", in(reg) phys, options(nostack));
}

static TICK_HZ_SET: AtomicBool = AtomicBool::new(false);

/// Bring up the timer, PIC remap and keyboard controller. Called once from
/// boot, after [`super::x86::gdt::init`] and [`super::x86::idt::init`].
///
/// # Safety
/// Must run exactly once, with interrupts still disabled.
pub unsafe fn init_platform(tick_hz: u32) {
    super::x86::gdt::init();
    super::x86::idt::init();
    super::x86::pic::init();
    super::x86::pit::init(tick_hz);
    TICK_HZ_SET.store(true, Ordering::Relaxed);
}

/// Monotonic tick count since [`init_platform`], advanced once per timer
/// IRQ for the scheduler's quantum accounting.
pub fn uptime_ticks() -> u64 {
    super::x86::pit::uptime_ticks()
}
