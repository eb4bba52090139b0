//! Scheduler's per-task view: a back-pointer to the owning PCB plus
//! everything the scheduler itself needs to know.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::Mutex;

use crate::arch::x86::context::Context;
use crate::process::pcb::{Pcb, Pid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Sleeping,
    Blocked,
    Zombie,
}

pub struct Tcb {
    pub pid: Pid,
    pub pcb: Arc<Pcb>,
    pub state: Mutex<TaskState>,
    pub base_priority: u8,
    pub effective_priority: AtomicU8,
    pub ticks_remaining: AtomicU32,
    pub wake_tick: AtomicU64,
    pub in_run_queue: AtomicBool,
    /// The task (if any) this one is blocked on, for priority-inheritance
    /// propagation.
    pub blocking: Mutex<Option<Pid>>,
    /// Tasks currently blocked on *this* one.
    pub blocked_tasks: Mutex<Vec<Pid>>,
}

impl Tcb {
    pub fn new(pid: Pid, pcb: Arc<Pcb>, base_priority: u8) -> Arc<Self> {
        Arc::new(Self {
            pid,
            pcb,
            state: Mutex::new(TaskState::Ready),
            base_priority,
            effective_priority: AtomicU8::new(base_priority),
            ticks_remaining: AtomicU32::new(0),
            wake_tick: AtomicU64::new(0),
            in_run_queue: AtomicBool::new(false),
            blocking: Mutex::new(None),
            blocked_tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    pub fn effective_priority(&self) -> u8 {
        self.effective_priority.load(Ordering::Relaxed)
    }

    pub fn set_effective_priority(&self, priority: u8) {
        self.effective_priority.store(priority, Ordering::Relaxed);
    }

    /// Raw pointer to this task's saved-context slot, for
    /// [`crate::arch::x86::context::switch_to`]. Backed by the PCB's
    /// `kernel_esp_for_switch` rather than a duplicate field here:
    /// `Context` and `AtomicU32` share layout, and the PCB is the single
    /// place that already tracks the primed first-run stack pointer.
    /// Only valid to dereference while holding the global scheduler lock.
    pub fn context_ptr(&self) -> *mut Context {
        &self.pcb.kernel_esp_for_switch as *const AtomicU32 as *mut Context
    }

    pub fn has_run(&self) -> bool {
        self.pcb.has_run.load(Ordering::SeqCst)
    }

    pub fn mark_has_run(&self) {
        self.pcb.has_run.store(true, Ordering::SeqCst);
    }
}
