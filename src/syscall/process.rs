//! Process-lifecycle syscalls: `exit`, `getpid`/`getppid`, `fork`,
//! `waitpid`, `execve`.

use core::sync::atomic::Ordering;

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::x86::idt::IsrFrame;
use crate::error::{Errno, ProcessError};
use crate::mm::VirtAddr;
use crate::process::lifecycle::ExitReason;
use crate::process::pcb::Pid;
use crate::sched::scheduler;
use crate::sched::tcb::TaskState;

use super::uaccess::{self, MAX_ARG_LEN};

pub const WNOHANG: i32 = 1;

pub fn sys_exit(code: i32) -> ! {
    crate::process::lifecycle::kill_current(ExitReason::Exited(code))
}

pub fn sys_getpid() -> Pid {
    scheduler::current_pid()
}

pub fn sys_getppid() -> Pid {
    scheduler::current_pcb().map(|pcb| pcb.ppid()).unwrap_or(0)
}

/// `frame` is the trapping syscall's own `IsrFrame`: the parent's syscall
/// return value gets overwritten by the caller with the child PID, and a
/// *copy* of this same frame (with `eax` forced to 0) is what the child
/// resumes into.
pub fn sys_fork(frame: &IsrFrame) -> Result<Pid, Errno> {
    crate::process::create::fork(frame).map_err(Into::into)
}

pub fn sys_waitpid(target_pid: i32, status_ptr: VirtAddr, options: i32) -> Result<i32, Errno> {
    loop {
        let pcb = scheduler::current_pcb().ok_or(Errno::ESRCH)?;
        let children = pcb.children.lock().clone();
        if target_pid != -1 && !children.contains(&(target_pid as Pid)) {
            return Err(Errno::ECHILD);
        }
        if children.is_empty() {
            return Err(Errno::ECHILD);
        }

        let mut zombie: Option<Pid> = None;
        for &cpid in &children {
            if target_pid != -1 && cpid != target_pid as Pid {
                continue;
            }
            if let Some(tcb) = scheduler::lookup(cpid) {
                if tcb.state() == TaskState::Zombie {
                    zombie = Some(cpid);
                    break;
                }
            }
        }

        if let Some(cpid) = zombie {
            let tcb = scheduler::lookup(cpid).ok_or(Errno::ECHILD)?;
            let code = tcb.pcb.exit_code.load(Ordering::SeqCst);
            if status_ptr != 0 {
                uaccess::copy_to_user(status_ptr, &code.to_le_bytes())?;
            }
            tcb.pcb.reaped.store(true, Ordering::Release);
            pcb.children.lock().retain(|&p| p != cpid);
            return Ok(cpid as i32);
        }

        if options & WNOHANG != 0 {
            return Ok(0);
        }
        scheduler::block_current();
    }
}

/// `execve`: validate `argv`/`envp`, pull every string into kernel
/// buffers *before* touching anything, then rebuild the calling
/// process's address space from `path`. On failure the caller's original
/// image is untouched — the rebuild only happens once everything that
/// can fail has already succeeded. On success `frame` — the trapping
/// syscall's own trap frame — is rewritten to resume directly in the new
/// image rather than returning normally: `execve` does not return on
/// success.
pub fn sys_execve(frame: &mut IsrFrame, path_ptr: VirtAddr, argv_ptr: VirtAddr, envp_ptr: VirtAddr) -> Result<(), Errno> {
    let path = uaccess::copy_string_from_user(path_ptr, super::uaccess::MAX_PATH_LEN)?;
    // Pulled into kernel buffers up front so a bad argv/envp pointer fails
    // before the address space is touched. Discarded rather than placed on
    // the new user stack: this kernel has no argument-vector delivery
    // mechanism yet, and `init`, the only program ever loaded this way
    // today, takes none.
    let _argv: Vec<String> = if argv_ptr != 0 {
        uaccess::copy_string_array_from_user(argv_ptr, MAX_ARG_LEN / 8)?
    } else {
        Vec::new()
    };
    let _envp: Vec<String> = if envp_ptr != 0 {
        uaccess::copy_string_array_from_user(envp_ptr, MAX_ARG_LEN / 8)?
    } else {
        Vec::new()
    };

    let (entry_point, user_stack_top) = crate::process::create::execve_current(&path).map_err(|e| match e {
        ProcessError::ExecFailed | ProcessError::ElfMalformed => Errno::ENOEXEC,
        other => other.into(),
    })?;

    crate::arch::x86::usermode::redirect_frame_to_new_image(frame, entry_point, user_stack_top);
    Ok(())
}
