//! The idle loop: runs whenever every ready queue is empty.
//! Not a task — it has no PCB/TCB, just the dedicated context the boot
//! thread is already running on when `enter_idle_mode` is first called.

/// Loop forever, halting between ticks and reaping collected zombies each
/// time we wake up. `super::scheduler::schedule()` switches away from this
/// context (saving it into the scheduler's idle-context slot) the first
/// time a real task becomes ready, and switches back into the exact same
/// `halt()` call site whenever the ready queues empty out again.
pub fn enter_idle_mode() -> ! {
    loop {
        super::reaper::reap_collected_zombies();
        super::scheduler::schedule();
        crate::arch::hal::halt();
    }
}
