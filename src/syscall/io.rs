//! Read/write and file-descriptor syscalls: `read`, `write`,
//! `open`, `close`, `lseek`, `dup2`.

use alloc::sync::Arc;
use alloc::vec;

use crate::error::Errno;
use crate::mm::{VirtAddr, PAGE_SIZE};
use crate::process::fd::{OpenFile, VnodeKind};
use crate::sched::scheduler;

use super::uaccess;

/// Both read and write process the user buffer in chunks of at most
/// this size.
const MAX_RW_CHUNK_SIZE: usize = PAGE_SIZE;

pub const O_RDONLY: u32 = 0;
pub const O_WRONLY: u32 = 1;
pub const O_RDWR: u32 = 2;
const O_ACCMODE: u32 = 0x3;

pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

fn current_pcb() -> Result<Arc<crate::process::pcb::Pcb>, Errno> {
    scheduler::current_pcb().ok_or(Errno::ESRCH)
}

/// Pull one chunk out of whatever `file` refers to.
fn read_chunk(file: &OpenFile, chunk: &mut [u8]) -> Result<usize, Errno> {
    if !file.readable {
        return Err(Errno::EBADF);
    }
    match file.kind {
        VnodeKind::Console => crate::console::read_line(chunk),
        VnodeKind::Pipe => file.pipe.as_ref().ok_or(Errno::EBADF)?.read(chunk),
        VnodeKind::File => {
            let driver = file.driver.as_ref().ok_or(Errno::EBADF)?;
            let inode = file.inode.ok_or(Errno::EBADF)?;
            let mut offset = file.offset.lock();
            let n = driver.read(inode, *offset, chunk).map_err(Errno::from)?;
            *offset += n as u64;
            Ok(n)
        }
    }
}

fn write_chunk(file: &OpenFile, chunk: &[u8]) -> Result<usize, Errno> {
    if !file.writable {
        return Err(Errno::EBADF);
    }
    match file.kind {
        VnodeKind::Console => crate::console::write_bytes(chunk),
        VnodeKind::Pipe => file.pipe.as_ref().ok_or(Errno::EBADF)?.write(chunk),
        VnodeKind::File => {
            let driver = file.driver.as_ref().ok_or(Errno::EBADF)?;
            let inode = file.inode.ok_or(Errno::EBADF)?;
            let mut offset = file.offset.lock();
            let n = driver.write(inode, *offset, chunk).map_err(Errno::from)?;
            *offset += n as u64;
            Ok(n)
        }
    }
}

/// Chunked, fault-tolerant read into a user buffer.
pub fn sys_read(fd: i32, user_buf: VirtAddr, len: usize) -> Result<usize, Errno> {
    let pcb = current_pcb()?;
    let file = pcb.fd_table.lock().get(fd)?;

    let mut done = 0usize;
    let mut kbuf = vec![0u8; len.min(MAX_RW_CHUNK_SIZE)];
    while done < len {
        let chunk_len = (len - done).min(MAX_RW_CHUNK_SIZE);
        let n = match read_chunk(&file, &mut kbuf[..chunk_len]) {
            Ok(n) => n,
            Err(e) => return if done > 0 { Ok(done) } else { Err(e) },
        };
        if n == 0 {
            break;
        }
        if let Err(e) = uaccess::copy_to_user(user_buf + done as u32, &kbuf[..n]) {
            return if done > 0 { Ok(done) } else { Err(e) };
        }
        done += n;
        if n < chunk_len {
            break;
        }
    }
    Ok(done)
}

/// Write copies from user first, then calls the underlying writer; if
/// the user copy faulted partway, the good prefix is still written
/// through.
pub fn sys_write(fd: i32, user_buf: VirtAddr, len: usize) -> Result<usize, Errno> {
    let pcb = current_pcb()?;
    let file = pcb.fd_table.lock().get(fd)?;

    let mut done = 0usize;
    while done < len {
        let chunk_len = (len - done).min(MAX_RW_CHUNK_SIZE);
        let kbuf = match uaccess::copy_from_user(user_buf + done as u32, chunk_len) {
            Ok(buf) => buf,
            Err(e) => return if done > 0 { Ok(done) } else { Err(e) },
        };
        let n = match write_chunk(&file, &kbuf) {
            Ok(n) => n,
            Err(e) => return if done > 0 { Ok(done) } else { Err(e) },
        };
        done += n;
        if n < chunk_len {
            break;
        }
    }
    Ok(done)
}

/// Join a (possibly relative) path against `pcb`'s current working
/// directory. Absolute paths pass through unchanged.
pub fn resolve_path(pcb: &crate::process::pcb::Pcb, path: &str) -> alloc::string::String {
    if path.starts_with('/') {
        return alloc::string::String::from(path);
    }
    let cwd = pcb.cwd.lock().clone();
    if cwd.ends_with('/') {
        alloc::format!("{cwd}{path}")
    } else {
        alloc::format!("{cwd}/{path}")
    }
}

pub fn sys_open(path_ptr: VirtAddr, flags: u32) -> Result<i32, Errno> {
    let raw_path = uaccess::copy_string_from_user(path_ptr, super::uaccess::MAX_PATH_LEN)?;
    let pcb = current_pcb()?;
    let path = resolve_path(&pcb, &raw_path);
    let (driver, inode) = crate::vfs::open(&path).map_err(Errno::from)?;
    let access = flags & O_ACCMODE;
    let readable = access == O_RDONLY || access == O_RDWR;
    let writable = access == O_WRONLY || access == O_RDWR;
    let file = OpenFile::file(driver, inode, readable, writable);
    pcb.fd_table
        .lock()
        .install(file)
        .map_err(|_| Errno::EMFILE)
}

pub fn sys_close(fd: i32) -> Result<(), Errno> {
    current_pcb()?.fd_table.lock().close(fd)
}

pub fn sys_lseek(fd: i32, offset: i64, whence: i32) -> Result<u64, Errno> {
    let pcb = current_pcb()?;
    let file = pcb.fd_table.lock().get(fd)?;
    match file.kind {
        VnodeKind::Console | VnodeKind::Pipe => Err(Errno::ESPIPE),
        VnodeKind::File => {
            let driver = file.driver.as_ref().ok_or(Errno::EBADF)?;
            let inode = file.inode.ok_or(Errno::EBADF)?;
            let size = driver.stat(inode).map_err(Errno::from)?.size;
            let mut cur = file.offset.lock();
            let base: i64 = match whence {
                SEEK_SET => 0,
                SEEK_CUR => *cur as i64,
                SEEK_END => size as i64,
                _ => return Err(Errno::EINVAL),
            };
            let new_offset = base.checked_add(offset).ok_or(Errno::EINVAL)?;
            if new_offset < 0 {
                return Err(Errno::EINVAL);
            }
            *cur = new_offset as u64;
            Ok(*cur)
        }
    }
}

pub fn sys_dup2(old: i32, new: i32) -> Result<i32, Errno> {
    current_pcb()?.fd_table.lock().dup2(old, new)
}
