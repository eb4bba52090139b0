//! Filesystem-metadata syscalls: `mkdir`, `rmdir`, `unlink`, `stat`,
//! `chdir`, `getcwd`, `getdents`.

use alloc::string::String;

use crate::error::Errno;
use crate::mm::VirtAddr;
use crate::process::fd::VnodeKind;
use crate::sched::scheduler;
use crate::vfs::{self, DirEntry};

use super::io::resolve_path;
use super::uaccess::{self, MAX_PATH_LEN};

fn current_pcb() -> Result<alloc::sync::Arc<crate::process::pcb::Pcb>, Errno> {
    scheduler::current_pcb().ok_or(Errno::ESRCH)
}

fn read_path_arg(path_ptr: VirtAddr) -> Result<String, Errno> {
    let pcb = current_pcb()?;
    let raw = uaccess::copy_string_from_user(path_ptr, MAX_PATH_LEN)?;
    Ok(resolve_path(&pcb, &raw))
}

pub fn sys_mkdir(path_ptr: VirtAddr) -> Result<(), Errno> {
    let path = read_path_arg(path_ptr)?;
    vfs::mkdir(&path).map_err(Errno::from)
}

pub fn sys_rmdir(path_ptr: VirtAddr) -> Result<(), Errno> {
    let path = read_path_arg(path_ptr)?;
    vfs::rmdir(&path).map_err(Errno::from)
}

pub fn sys_unlink(path_ptr: VirtAddr) -> Result<(), Errno> {
    let path = read_path_arg(path_ptr)?;
    vfs::unlink(&path).map_err(Errno::from)
}

/// Packed on-the-wire layout for `stat`'s `FileStat`, without pulling in
/// a `#[repr(packed)]` footgun since every field here is already
/// naturally aligned.
#[repr(C)]
struct StatBuf {
    inode: u64,
    size: u64,
    is_directory: u32,
    _reserved: u32,
}

fn stat_buf_bytes(stat: vfs::FileStat) -> [u8; core::mem::size_of::<StatBuf>()] {
    let buf = StatBuf {
        inode: stat.inode,
        size: stat.size,
        is_directory: stat.is_directory as u32,
        _reserved: 0,
    };
    unsafe { core::mem::transmute(buf) }
}

pub fn sys_stat(path_ptr: VirtAddr, user_statbuf: VirtAddr) -> Result<(), Errno> {
    let path = read_path_arg(path_ptr)?;
    let stat = vfs::stat(&path).map_err(Errno::from)?;
    uaccess::copy_to_user(user_statbuf, &stat_buf_bytes(stat))
}

pub fn sys_chdir(path_ptr: VirtAddr) -> Result<(), Errno> {
    let path = read_path_arg(path_ptr)?;
    let stat = vfs::stat(&path).map_err(Errno::from)?;
    if !stat.is_directory {
        return Err(Errno::ENOTDIR);
    }
    let pcb = current_pcb()?;
    *pcb.cwd.lock() = path;
    Ok(())
}

pub fn sys_getcwd(user_buf: VirtAddr, size: usize) -> Result<usize, Errno> {
    let pcb = current_pcb()?;
    let cwd = pcb.cwd.lock().clone();
    let needed = cwd.len() + 1; // NUL terminator
    if needed > size {
        return Err(Errno::ERANGE);
    }
    let mut bytes = alloc::vec::Vec::with_capacity(needed);
    bytes.extend_from_slice(cwd.as_bytes());
    bytes.push(0);
    uaccess::copy_to_user(user_buf, &bytes)?;
    Ok(cwd.len())
}

const DIRENT_HEADER_SIZE: usize = core::mem::size_of::<u64>() + 2 + 1 + 1;

fn encode_dirent(entry: &DirEntry, out: &mut alloc::vec::Vec<u8>) {
    let name_bytes = entry.name.as_bytes();
    let reclen = DIRENT_HEADER_SIZE + name_bytes.len() + 1; // + NUL
    out.extend_from_slice(&entry.inode.to_le_bytes());
    out.extend_from_slice(&(reclen as u16).to_le_bytes());
    out.push(entry.is_directory as u8);
    out.push(0); // reserved
    out.extend_from_slice(name_bytes);
    out.push(0);
}

/// `getdents`: serialize as many of the open directory's entries as
/// fit in the caller's buffer, starting where the last call left off
/// (tracked in the open-file object's offset, here an entry index rather
/// than a byte offset).
pub fn sys_getdents(fd: i32, user_buf: VirtAddr, buf_size: usize) -> Result<usize, Errno> {
    let pcb = current_pcb()?;
    let file = pcb.fd_table.lock().get(fd)?;
    if file.kind != VnodeKind::File {
        return Err(Errno::ENOTDIR);
    }
    let driver = file.driver.as_ref().ok_or(Errno::EBADF)?;
    let inode = file.inode.ok_or(Errno::EBADF)?;
    let entries = driver.readdir(inode).map_err(Errno::from)?;

    let mut offset = file.offset.lock();
    let start = *offset as usize;
    if start >= entries.len() {
        return Ok(0);
    }

    let mut out = alloc::vec::Vec::new();
    let mut consumed = 0usize;
    for entry in &entries[start..] {
        let mut encoded = alloc::vec::Vec::new();
        encode_dirent(entry, &mut encoded);
        if out.len() + encoded.len() > buf_size {
            break;
        }
        out.extend_from_slice(&encoded);
        consumed += 1;
    }
    if consumed == 0 {
        return Err(Errno::EINVAL); // caller's buffer is too small for even one entry
    }
    *offset += consumed as u64;
    drop(offset);

    uaccess::copy_to_user(user_buf, &out)?;
    Ok(out.len())
}
