//! Priority inheritance: when a higher-priority task `w` blocks on
//! a lower-priority task `h`, `h` temporarily runs at `w`'s priority so it
//! can't be starved by tasks between the two of them in priority order.
//! Propagates transitively along a blocking chain and unwinds the same way
//! once the block is released.

use alloc::sync::Arc;

use super::tcb::Tcb;
use crate::process::pcb::Pid;

/// Record that `waiter` is now blocked on `holder`, boosting `holder`'s
/// (and transitively, whatever `holder` is itself blocked on) effective
/// priority to at least `waiter`'s.
pub fn add_blocked_task(waiter: &Arc<Tcb>, holder: &Arc<Tcb>) {
    *waiter.blocking.lock() = Some(holder.pid);
    holder.blocked_tasks.lock().push(waiter.pid);
    propagate_priority(holder, waiter.effective_priority());
}

fn propagate_priority(start: &Arc<Tcb>, priority: u8) {
    let mut current = start.clone();
    loop {
        if priority >= current.effective_priority() {
            break;
        }
        current.set_effective_priority(priority);
        if current.state() == super::tcb::TaskState::Ready && current.in_run_queue.load(core::sync::atomic::Ordering::Relaxed)
        {
            super::scheduler::requeue_at_current_priority(&current);
        }
        let next_pid = *current.blocking.lock();
        match next_pid.and_then(|pid| super::scheduler::lookup(pid)) {
            Some(next) => current = next,
            None => break,
        }
    }
}

/// Record that `waiter` is no longer blocked on `holder`. Recomputes
/// `holder`'s effective priority as the max of its own base priority and
/// whatever other waiters it still has, then propagates that recomputed
/// value up any further chain `holder` itself is blocked on.
pub fn remove_blocked_task(waiter: Pid, holder: &Arc<Tcb>) {
    *match super::scheduler::lookup(waiter) {
        Some(w) => w.blocking.lock(),
        None => return,
    } = None;
    holder.blocked_tasks.lock().retain(|&p| p != waiter);
    recompute_priority(holder);
}

fn recompute_priority(tcb: &Arc<Tcb>) {
    let mut highest = tcb.base_priority;
    for pid in tcb.blocked_tasks.lock().iter() {
        if let Some(waiter) = super::scheduler::lookup(*pid) {
            highest = highest.min(waiter.effective_priority());
        }
    }
    tcb.set_effective_priority(highest);
    if let Some(next_pid) = *tcb.blocking.lock() {
        if let Some(next) = super::scheduler::lookup(next_pid) {
            recompute_priority(&next);
        }
    }
}
