//! Process control block.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use spin::Mutex;

use super::fd::FdTable;
use super::kstack::KernelStack;
use crate::mm::vma::MmStruct;
use crate::mm::{PhysAddr, VirtAddr};

pub type Pid = u32;

/// Process-group/session linkage.
pub struct GroupInfo {
    pub sid: Pid,
    pub pgid: Pid,
    pub is_session_leader: bool,
    pub is_group_leader: bool,
    pub has_controlling_terminal: bool,
}

pub struct Pcb {
    pub pid: Pid,
    /// Parent PID. Not `pub` directly: re-parenting on a parent's exit
    /// needs to mutate it after the PCB is built.
    ppid: AtomicU32,
    pub group: Mutex<GroupInfo>,
    pub exit_code: AtomicI32,
    /// Behind a lock rather than a bare `Arc` so `execve` can swap in a
    /// freshly built address space without replacing the PCB itself.
    pub mm: Mutex<Arc<MmStruct>>,
    pub kernel_stack: Mutex<Option<KernelStack>>,
    pub kernel_stack_vaddr_top: VirtAddr,
    /// Entry point and initial stack top for this task's very first run
    /// ([`crate::arch::x86::usermode::first_run_trampoline`]). Atomics
    /// rather than plain fields so `execve` can overwrite them for the
    /// process it's replacing in place.
    user_stack_top: AtomicU32,
    entry_point: AtomicU32,
    /// Saved ESP the scheduler switches to on this task's first run, or
    /// restores on every subsequent switch.
    pub kernel_esp_for_switch: AtomicU32,
    /// True once this task has been context-switched to at least once;
    /// distinguishes the first-run IRET path from a normal switch.
    pub has_run: AtomicBool,
    pub fd_table: Mutex<FdTable>,
    /// Current working directory, used by `chdir`/`getcwd`; an absolute
    /// path string rather than a resolved inode — the VFS here has no
    /// directory-handle concept to hold open.
    pub cwd: Mutex<String>,
    pub children: Mutex<Vec<Pid>>,
    /// Set by `waitpid` once a parent has collected this zombie's exit
    /// code; only then may the reaper actually tear it down.
    pub reaped: AtomicBool,
    /// A forked child's exact resume point: the parent's syscall
    /// trap frame, with `eax` forced to 0. Consumed once by
    /// [`crate::arch::x86::usermode::fork_child_trampoline`] on the
    /// child's first switch-to. `None` for processes created by `exec`.
    pub resume_frame: Mutex<Option<crate::arch::x86::idt::IsrFrame>>,
}

impl Pcb {
    pub fn new(
        pid: Pid,
        ppid: Pid,
        mm: Arc<MmStruct>,
        kernel_stack: KernelStack,
        user_stack_top: VirtAddr,
        entry_point: VirtAddr,
        fd_table: FdTable,
    ) -> Arc<Self> {
        let kernel_stack_vaddr_top = kernel_stack.virt_top;
        Arc::new(Self {
            pid,
            ppid: AtomicU32::new(ppid),
            group: Mutex::new(GroupInfo {
                sid: ppid,
                pgid: ppid,
                is_session_leader: false,
                is_group_leader: false,
                has_controlling_terminal: true,
            }),
            exit_code: AtomicI32::new(0),
            mm: Mutex::new(mm),
            kernel_stack: Mutex::new(Some(kernel_stack)),
            kernel_stack_vaddr_top,
            user_stack_top: AtomicU32::new(user_stack_top),
            entry_point: AtomicU32::new(entry_point),
            kernel_esp_for_switch: AtomicU32::new(0),
            has_run: AtomicBool::new(false),
            fd_table: Mutex::new(fd_table),
            cwd: Mutex::new(String::from("/")),
            children: Mutex::new(Vec::new()),
            reaped: AtomicBool::new(false),
            resume_frame: Mutex::new(None),
        })
    }

    pub fn pd_phys(&self) -> PhysAddr {
        self.mm.lock().pd_phys
    }

    pub fn mm(&self) -> Arc<MmStruct> {
        self.mm.lock().clone()
    }

    /// Swap in a freshly built address space, as `execve` does. The
    /// caller is responsible for having already torn down the old one.
    pub fn set_mm(&self, mm: Arc<MmStruct>) {
        *self.mm.lock() = mm;
    }

    pub fn entry_point(&self) -> VirtAddr {
        self.entry_point.load(Ordering::Relaxed)
    }

    pub fn user_stack_top(&self) -> VirtAddr {
        self.user_stack_top.load(Ordering::Relaxed)
    }

    /// `execve`: retarget this PCB's recorded entry point and stack
    /// top to the freshly loaded image. Has no effect on a task already
    /// past its first run other than bookkeeping — that task's resumption
    /// is redirected directly through its in-flight syscall trap frame
    /// instead.
    pub fn set_entry_point(&self, entry_point: VirtAddr) {
        self.entry_point.store(entry_point, Ordering::Relaxed);
    }

    pub fn set_user_stack_top(&self, user_stack_top: VirtAddr) {
        self.user_stack_top.store(user_stack_top, Ordering::Relaxed);
    }

    pub fn ppid(&self) -> Pid {
        self.ppid.load(Ordering::Relaxed)
    }

    pub fn set_ppid(&self, ppid: Pid) {
        self.ppid.store(ppid, Ordering::Relaxed);
    }
}
