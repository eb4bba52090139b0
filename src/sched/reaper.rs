//! Zombie reaper: an idle-task work item that splices finished tasks out
//! of the scheduler's task table and tears down their process state.
//!
//! A zombie is only destroyed once its parent has collected its exit code
//! via `waitpid` (tracked by [`crate::process::pcb::Pcb::reaped`]) —
//! reaping it any earlier would free the PCB `waitpid` still needs to read
//! from.

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use super::tcb::TaskState;

/// Destroy every already-collected zombie. Called once per idle-loop
/// iteration.
pub fn reap_collected_zombies() {
    let zombie_pids: Vec<_> = super::scheduler::with_tasks(|tasks| {
        tasks
            .values()
            .filter(|tcb| tcb.state() == TaskState::Zombie && tcb.pcb.reaped.load(Ordering::Acquire))
            .map(|tcb| tcb.pid)
            .collect()
    });
    for pid in zombie_pids {
        super::scheduler::remove_task(pid);
        crate::process::destroy::destroy_process(pid);
    }
}
