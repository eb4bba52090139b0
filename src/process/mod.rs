//! Process subsystem: PCB table, creation, destruction, and the
//! group/lifecycle glue the scheduler and syscalls call into.

pub mod create;
pub mod destroy;
pub mod fd;
pub mod groups;
pub mod kstack;
pub mod lifecycle;
pub mod pcb;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use pcb::{Pcb, Pid};

/// PID 1 is `init`; every orphaned process is re-parented to it.
pub const INIT_PID: Pid = 1;

static PROCESS_TABLE: Mutex<BTreeMap<Pid, Arc<Pcb>>> = Mutex::new(BTreeMap::new());
static NEXT_PID: AtomicU32 = AtomicU32::new(INIT_PID);

pub fn allocate_pid() -> Pid {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

pub fn register(pcb: Arc<Pcb>) {
    PROCESS_TABLE.lock().insert(pcb.pid, pcb);
}

pub fn unregister(pid: Pid) -> Option<Arc<Pcb>> {
    PROCESS_TABLE.lock().remove(&pid)
}

pub fn lookup(pid: Pid) -> Option<Arc<Pcb>> {
    PROCESS_TABLE.lock().get(&pid).cloned()
}

/// The running task's address space, for the page-fault handler.
pub fn current_mm() -> Option<Arc<crate::mm::vma::MmStruct>> {
    crate::sched::scheduler::current_pcb().map(|pcb| pcb.mm())
}

pub fn current_pid() -> Pid {
    crate::sched::scheduler::current_pid()
}

/// Re-parent every child of `dead_pid` to [`INIT_PID`]. Called from
/// [`crate::sched::scheduler::remove_current_task_with_code`] before the
/// dying task is handed off to the zombie reaper.
pub fn reparent_orphans(dead_pid: Pid) {
    if dead_pid == INIT_PID {
        return;
    }
    let children = match lookup(dead_pid) {
        Some(pcb) => core::mem::take(&mut *pcb.children.lock()),
        None => return,
    };
    if children.is_empty() {
        return;
    }
    for &child_pid in &children {
        if let Some(child) = lookup(child_pid) {
            child.set_ppid(INIT_PID);
        }
    }
    if let Some(init_pcb) = lookup(INIT_PID) {
        init_pcb.children.lock().extend(children);
    }
}

/// Mount the VFS and launch the init process named in the boot
/// configuration.
pub fn init() {
    crate::vfs::init();
    let init_path = crate::config::boot_config().init_path;
    match create::create_user_process(init_path, 0, 1) {
        Ok(pid) => log::info!("process: launched init at {init_path:?} as pid {pid}"),
        Err(e) => panic!("failed to launch init process {init_path:?}: {e:?}"),
    }
}
