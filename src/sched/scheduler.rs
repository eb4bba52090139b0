//! Priority-preemptive scheduler core: task table, run-queue selection,
//! context switching and the voluntary-blocking entry points every other
//! subsystem calls through.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use super::queue::{RunQueues, LEVEL_SLICE_MS, SCHED_PRIORITY_LEVELS};
use super::tcb::{TaskState, Tcb};
use crate::arch::hal;
use crate::arch::x86::context::{self, Context};
use crate::arch::x86::gdt;
use crate::process::pcb::{Pcb, Pid};

static TASKS: Mutex<BTreeMap<Pid, Arc<Tcb>>> = Mutex::new(BTreeMap::new());
static RUN_QUEUES: RunQueues = RunQueues::new();
static SLEEPERS: Mutex<Vec<Pid>> = Mutex::new(Vec::new());
static CURRENT: Mutex<Option<Arc<Tcb>>> = Mutex::new(None);
static CURRENT_PD_PHYS: AtomicU32 = AtomicU32::new(0);

/// The boot thread's own saved context. Populated the first time
/// [`schedule`] switches away from it; resumed whenever the ready queues
/// empty out again. Idle is never context-switched to through the normal
/// path — it's the *boot* stack, not a dedicated one.
struct IdleContextCell(core::cell::UnsafeCell<Context>);
unsafe impl Sync for IdleContextCell {}
static IDLE_CONTEXT: IdleContextCell = IdleContextCell(core::cell::UnsafeCell::new(Context { esp: 0 }));

fn idle_context_ptr() -> *mut Context {
    IDLE_CONTEXT.0.get()
}

/// Bring up scheduler-internal state. Must run after [`crate::process::init`]
/// has already registered the first task via [`create_and_enqueue_task`].
pub fn init() {
    CURRENT_PD_PHYS.store(crate::mm::paging::kernel_pd_phys(), Ordering::Relaxed);
    log::info!("scheduler: {} task(s) in the initial run queue", TASKS.lock().len());
}

/// Never returns: the boot thread becomes the idle loop.
pub fn run_idle() -> ! {
    super::idle::enter_idle_mode()
}

fn ms_to_ticks(ms: u32) -> u32 {
    let tick_hz = crate::config::boot_config().tick_hz;
    (((ms as u64) * tick_hz as u64) / 1000).max(1) as u32
}

fn assign_quantum(tcb: &Arc<Tcb>) {
    let level = (tcb.effective_priority() as usize).min(SCHED_PRIORITY_LEVELS - 1);
    tcb.ticks_remaining.store(ms_to_ticks(LEVEL_SLICE_MS[level]), Ordering::Relaxed);
}

/// Register a freshly created process as a schedulable task at `priority`
/// (0 = highest) and place it in the ready queue.
pub fn create_and_enqueue_task(pcb: Arc<Pcb>, priority: u8) -> Pid {
    let pid = pcb.pid;
    let tcb = Tcb::new(pid, pcb, priority.min(SCHED_PRIORITY_LEVELS as u8 - 1));
    assign_quantum(&tcb);
    TASKS.lock().insert(pid, tcb.clone());
    RUN_QUEUES.enqueue(&tcb);
    pid
}

pub fn lookup(pid: Pid) -> Option<Arc<Tcb>> {
    TASKS.lock().get(&pid).cloned()
}

pub fn with_tasks<R>(f: impl FnOnce(&BTreeMap<Pid, Arc<Tcb>>) -> R) -> R {
    f(&TASKS.lock())
}

/// Drop a task from the scheduler's table entirely. Only valid once it is
/// Zombie and has already been spliced out of every queue (the reaper's job).
pub fn remove_task(pid: Pid) -> Option<Arc<Tcb>> {
    TASKS.lock().remove(&pid)
}

pub fn current_tcb() -> Option<Arc<Tcb>> {
    CURRENT.lock().clone()
}

pub fn current_pcb() -> Option<Arc<Pcb>> {
    current_tcb().map(|tcb| tcb.pcb.clone())
}

/// The running task's PID, or `0` if called while idle (no real PID is
/// ever allocated `0`; every genuine caller runs from inside a task).
pub fn current_pid() -> Pid {
    current_tcb().map(|tcb| tcb.pid).unwrap_or(0)
}

/// Re-insert an already-enqueued task at whatever level its effective
/// priority now maps to, after a priority-inheritance boost/unwind.
pub fn requeue_at_current_priority(tcb: &Arc<Tcb>) {
    RUN_QUEUES.remove(tcb);
    RUN_QUEUES.enqueue(tcb);
}

fn make_ready(tcb: &Arc<Tcb>) {
    tcb.set_state(TaskState::Ready);
    RUN_QUEUES.enqueue(tcb);
}

/// If `tcb` now outranks whatever is currently running (or nothing is
/// running at all), preempt immediately instead of waiting for the next
/// tick — the scheduler is priority-preemptive, not just round-robin.
fn maybe_preempt_for(tcb: &Arc<Tcb>) {
    match current_tcb() {
        Some(cur) if tcb.effective_priority() < cur.effective_priority() => schedule(),
        None => schedule(),
        _ => {}
    }
}

/// Put the current task to sleep for `ms` milliseconds.
pub fn sleep_ms(ms: u32) {
    let ticks = ms_to_ticks(ms);
    hal::without_interrupts(|| {
        let Some(cur) = current_tcb() else { return };
        cur.wake_tick.store(hal::uptime_ticks() + ticks as u64, Ordering::Relaxed);
        cur.set_state(TaskState::Sleeping);
        SLEEPERS.lock().push(cur.pid);
        schedule();
    });
}

fn block_current_internal() {
    hal::without_interrupts(|| {
        let Some(cur) = current_tcb() else { return };
        cur.set_state(TaskState::Blocked);
        schedule();
    });
}

/// Block the current task until woken by [`scheduler_unblock_task`]. The
/// pipe id is accepted for call-site clarity but the scheduler itself
/// tracks no resource association — the pipe records its own waiter list
/// and calls `scheduler_unblock_task` directly.
pub fn block_current_on_pipe(_pipe_id: u32) {
    block_current_internal();
}

/// Block the current task on an arbitrary external wake-up (the terminal
/// line discipline's single-waiter wait).
pub fn block_current() {
    block_current_internal();
}

/// Wake a task that was [`block_current`]/[`block_current_on_pipe`]-ed or
/// sleeping, making it ready and preempting immediately if it now outranks
/// whatever is running.
pub fn scheduler_unblock_task(pid: Pid) {
    hal::without_interrupts(|| {
        let Some(tcb) = lookup(pid) else { return };
        match tcb.state() {
            TaskState::Blocked => {
                make_ready(&tcb);
                maybe_preempt_for(&tcb);
            }
            TaskState::Sleeping => {
                SLEEPERS.lock().retain(|&p| p != pid);
                make_ready(&tcb);
                maybe_preempt_for(&tcb);
            }
            _ => {}
        }
    });
}

fn release_expired_sleepers() {
    let now = hal::uptime_ticks();
    let woken: Vec<Pid> = {
        let mut sleepers = SLEEPERS.lock();
        let mut woken = Vec::new();
        sleepers.retain(|&pid| match lookup(pid) {
            Some(tcb) if tcb.wake_tick.load(Ordering::Relaxed) <= now => {
                woken.push(pid);
                false
            }
            Some(_) => true,
            None => false,
        });
        woken
    };
    let mut best: Option<Arc<Tcb>> = None;
    for pid in woken {
        if let Some(tcb) = lookup(pid) {
            make_ready(&tcb);
            if best.as_ref().map(|b| tcb.effective_priority() < b.effective_priority()).unwrap_or(true) {
                best = Some(tcb);
            }
        }
    }
    if let Some(tcb) = best {
        maybe_preempt_for(&tcb);
    }
}

/// Timer-IRQ entry point. `pit::on_tick` has already run by the time this
/// is called.
pub fn tick() {
    release_expired_sleepers();
    let mut quantum_expired = false;
    if let Some(cur) = current_tcb() {
        let remaining = cur.ticks_remaining.load(Ordering::Relaxed);
        if remaining == 0 {
            quantum_expired = true;
        } else {
            cur.ticks_remaining.store(remaining - 1, Ordering::Relaxed);
            quantum_expired = remaining - 1 == 0;
        }
    }
    if quantum_expired {
        schedule();
    }
}

/// Terminate the current task with `code` and never return.
pub fn remove_current_task_with_code(code: i32) -> ! {
    hal::without_interrupts(|| {
        if let Some(cur) = current_tcb() {
            cur.pcb.exit_code.store(code, Ordering::SeqCst);
            cur.set_state(TaskState::Zombie);
            crate::process::reparent_orphans(cur.pid);
            // Wake the parent in case it's already blocked inside
            // `waitpid`; a no-op if it isn't.
            scheduler_unblock_task(cur.pcb.ppid());

            let waiters = core::mem::take(&mut *cur.blocked_tasks.lock());
            for waiter_pid in waiters {
                if let Some(waiter) = lookup(waiter_pid) {
                    *waiter.blocking.lock() = None;
                }
            }
            if let Some(holder_pid) = *cur.blocking.lock() {
                if let Some(holder) = lookup(holder_pid) {
                    super::priority_inherit::remove_blocked_task(cur.pid, &holder);
                }
            }
        }
        schedule();
    });
    loop {
        hal::halt();
    }
}

fn switch_address_space_if_needed(next_pd_phys: u32) {
    if CURRENT_PD_PHYS.load(Ordering::Relaxed) != next_pd_phys {
        unsafe { hal::load_cr3(next_pd_phys) };
        CURRENT_PD_PHYS.store(next_pd_phys, Ordering::Relaxed);
    }
}

/// Load a new page directory for the *currently running* task outside of
/// an ordinary [`schedule`] decision (`execve`, which replaces a live
/// task's address space in place rather than switching to a different
/// task). Keeps the scheduler's own "skip the reload if it's already
/// current" cache in sync.
pub fn set_current_address_space(pd_phys: u32) {
    switch_address_space_if_needed(pd_phys);
}

/// The scheduling decision point: pick the next task, switch to it if it
/// differs from whatever is running, or fall through to idle if nothing
/// is ready and the caller isn't still runnable.
pub fn schedule() {
    hal::without_interrupts(|| {
        let prev = CURRENT.lock().take();
        let prev_was_running = prev.as_ref().map(|p| p.state() == TaskState::Running).unwrap_or(false);

        match RUN_QUEUES.dequeue_highest().and_then(lookup) {
            None => {
                if prev_was_running {
                    // Nothing else is ready; keep running the current task.
                    *CURRENT.lock() = prev;
                    return;
                }
                // The current task gave up the CPU (blocked/slept/exited)
                // and there's nothing to replace it with: fall to idle.
                let prev_ctx_ptr = prev.as_ref().map(|p| p.context_ptr());
                drop(prev);
                if let Some(prev_ctx_ptr) = prev_ctx_ptr {
                    unsafe { context::switch_to(prev_ctx_ptr, idle_context_ptr() as *const Context) };
                }
                // else: we're already idle and nothing became ready, just return.
            }
            Some(next) => {
                next.in_run_queue.store(false, Ordering::Relaxed);
                if prev_was_running {
                    if let Some(p) = prev.as_ref() {
                        p.set_state(TaskState::Ready);
                        RUN_QUEUES.enqueue(p);
                    }
                }
                next.set_state(TaskState::Running);
                assign_quantum(&next);
                gdt::set_kernel_stack(next.pcb.kernel_stack_vaddr_top);
                switch_address_space_if_needed(next.pcb.pd_phys());
                let prev_ctx_ptr = prev.as_ref().map(|p| p.context_ptr()).unwrap_or_else(idle_context_ptr);
                let next_ctx_ptr = next.context_ptr() as *const Context;
                next.mark_has_run();
                *CURRENT.lock() = Some(next);
                drop(prev);
                unsafe { context::switch_to(prev_ctx_ptr, next_ctx_ptr) };
            }
        }
    })
}

// No unit tests here: every entry point needs a live boot config, task
// table and real page directories to mean anything. Exercised instead by
// the `scheduler_tests` bare-metal integration target (C17).
