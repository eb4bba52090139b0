//! Per-priority ready queues. Four levels, lower index runs first;
//! level 3 is the lowest (background) priority a real task can hold —
//! distinct from the dedicated idle loop, which only ever runs when all
//! four queues are empty.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use spin::Mutex;

use super::tcb::Tcb;
use crate::process::pcb::Pid;

pub const SCHED_PRIORITY_LEVELS: usize = 4;

/// Time slice granted at each level, in ticks at the configured `tick_hz`.
/// Converted from milliseconds assuming the default 1 kHz tick; levels
/// below 0 get a shorter slice so interactive tasks round-robin faster.
pub const LEVEL_SLICE_MS: [u32; SCHED_PRIORITY_LEVELS] = [200, 100, 50, 25];

pub struct RunQueues {
    levels: [Mutex<VecDeque<Pid>>; SCHED_PRIORITY_LEVELS],
}

impl RunQueues {
    pub const fn new() -> Self {
        Self {
            levels: [
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
            ],
        }
    }

    pub fn enqueue(&self, tcb: &Arc<Tcb>) {
        let level = (tcb.effective_priority() as usize).min(SCHED_PRIORITY_LEVELS - 1);
        tcb.in_run_queue.store(true, Ordering::Relaxed);
        self.levels[level].lock().push_back(tcb.pid);
    }

    /// Dequeue the head of the highest non-empty level.
    pub fn dequeue_highest(&self) -> Option<Pid> {
        for level in self.levels.iter() {
            if let Some(pid) = level.lock().pop_front() {
                return Some(pid);
            }
        }
        None
    }

    /// Remove `tcb` from whichever level it's sitting in, if any. Used when
    /// a blocked/sleeping task's priority is boosted out from under it by
    /// priority inheritance.
    pub fn remove(&self, tcb: &Arc<Tcb>) -> bool {
        for level in self.levels.iter() {
            let mut queue = level.lock();
            if let Some(pos) = queue.iter().position(|&p| p == tcb.pid) {
                queue.remove(pos);
                tcb.in_run_queue.store(false, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|level| level.lock().is_empty())
    }
}
