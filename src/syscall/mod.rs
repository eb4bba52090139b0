//! Syscall ABI: the `int 0x80` gate's dispatch table. Arguments
//! arrive in `ebx`/`ecx`/`edx` (arg1/arg2/arg3); `eax` carries the syscall
//! number in and the signed return value out, negative meaning `-errno`.

pub mod fs;
pub mod io;
pub mod process;
pub mod uaccess;

use crate::arch::x86::idt::IsrFrame;
use crate::error::Errno;

pub const SYS_READ: u32 = 0;
pub const SYS_WRITE: u32 = 1;
pub const SYS_OPEN: u32 = 2;
pub const SYS_CLOSE: u32 = 3;
pub const SYS_LSEEK: u32 = 4;
pub const SYS_DUP2: u32 = 5;
pub const SYS_MKDIR: u32 = 6;
pub const SYS_RMDIR: u32 = 7;
pub const SYS_UNLINK: u32 = 8;
pub const SYS_STAT: u32 = 9;
pub const SYS_CHDIR: u32 = 10;
pub const SYS_GETCWD: u32 = 11;
pub const SYS_GETDENTS: u32 = 12;
pub const SYS_EXIT: u32 = 13;
pub const SYS_FORK: u32 = 14;
pub const SYS_EXECVE: u32 = 15;
pub const SYS_WAITPID: u32 = 16;
pub const SYS_GETPID: u32 = 17;
pub const SYS_GETPPID: u32 = 18;

/// One call's worth of raw register arguments, named the way the ABI
/// names them rather than by what a given syscall does with them.
struct Args {
    arg1: u32,
    arg2: u32,
    arg3: u32,
}

fn args_of(frame: &IsrFrame) -> Args {
    Args {
        arg1: frame.ebx,
        arg2: frame.ecx,
        arg3: frame.edx,
    }
}

fn encode(result: Result<i64, Errno>) -> i32 {
    match result {
        Ok(v) => v as i32,
        Err(e) => e.as_negative_isize() as i32,
    }
}

/// Entry point called from [`crate::arch::x86::idt`]'s vector-0x80
/// handler. Writes the syscall's return value into `frame.eax`.
pub fn dispatch(frame: *mut IsrFrame) {
    let frame = unsafe { &mut *frame };
    let number = frame.eax;
    let a = args_of(frame);

    let ret: i32 = match number {
        SYS_READ => encode(io::sys_read(a.arg1 as i32, a.arg2, a.arg3 as usize).map(|n| n as i64)),
        SYS_WRITE => encode(io::sys_write(a.arg1 as i32, a.arg2, a.arg3 as usize).map(|n| n as i64)),
        SYS_OPEN => encode(io::sys_open(a.arg1, a.arg2).map(|fd| fd as i64)),
        SYS_CLOSE => encode(io::sys_close(a.arg1 as i32).map(|_| 0)),
        SYS_LSEEK => encode(io::sys_lseek(a.arg1 as i32, a.arg2 as i32 as i64, a.arg3 as i32).map(|n| n as i64)),
        SYS_DUP2 => encode(io::sys_dup2(a.arg1 as i32, a.arg2 as i32).map(|fd| fd as i64)),
        SYS_MKDIR => encode(fs::sys_mkdir(a.arg1).map(|_| 0)),
        SYS_RMDIR => encode(fs::sys_rmdir(a.arg1).map(|_| 0)),
        SYS_UNLINK => encode(fs::sys_unlink(a.arg1).map(|_| 0)),
        SYS_STAT => encode(fs::sys_stat(a.arg1, a.arg2).map(|_| 0)),
        SYS_CHDIR => encode(fs::sys_chdir(a.arg1).map(|_| 0)),
        SYS_GETCWD => encode(fs::sys_getcwd(a.arg1, a.arg2 as usize).map(|n| n as i64)),
        SYS_GETDENTS => encode(fs::sys_getdents(a.arg1 as i32, a.arg2, a.arg3 as usize).map(|n| n as i64)),
        SYS_EXIT => process::sys_exit(a.arg1 as i32),
        SYS_FORK => encode(process::sys_fork(frame).map(|pid| pid as i64)),
        SYS_EXECVE => {
            let result = process::sys_execve(frame, a.arg1, a.arg2, a.arg3);
            // On success `frame` now points at the new image and `eax`
            // must stay 0 (execve "returns" into a brand new register
            // file, not a return value); on failure fall through to the
            // normal encode-and-write-back path below.
            match result {
                Ok(()) => 0,
                Err(e) => e.as_negative_isize() as i32,
            }
        }
        SYS_WAITPID => encode(process::sys_waitpid(a.arg1 as i32, a.arg2, a.arg3 as i32).map(|n| n as i64)),
        SYS_GETPID => process::sys_getpid() as i32,
        SYS_GETPPID => process::sys_getppid() as i32,
        other => {
            log::warn!("syscall: unknown syscall number {other}");
            Errno::ENOSYS.as_negative_isize() as i32
        }
    };

    frame.eax = ret as u32;
}
