//! User-pointer validation and copying: the one place in the kernel
//! that is allowed to dereference an address a process handed us over
//! the syscall ABI.
//!
//! Validation walks the current `mm_struct`'s VMA tree and proactively
//! pages in anything demand-paged but not yet touched, so the byte copy
//! that follows should never actually fault. It can, in principle: the
//! copy still goes through [`read_user_byte`]/[`write_user_byte`], a pair
//! of single-instruction naked routines with a landing pad right after
//! the risky instruction, the same extable idiom `isr_common` already
//! relies on for its own `popa`/`iretd` tail. [`try_recover_fault`] is
//! what [`crate::mm::page_fault`] calls to redirect a kernel-mode fault
//! into that landing pad instead of panicking.

use core::arch::naked_asm;

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::x86::boot::KERNEL_VIRT_BASE;
use crate::arch::x86::idt::IsrFrame;
use crate::error::Errno;
use crate::mm::vma::{MmStruct, VmaFlags};
use crate::mm::{align_down, align_up, VirtAddr, PAGE_SIZE};

pub const MAX_PATH_LEN: usize = 4096;
pub const MAX_ARG_LEN: usize = 128 * 1024;
pub const MAX_BUFFER_LEN: usize = 1024 * 1024;

unsafe extern "C" {
    static __uaccess_read_fault_site: u8;
    static __uaccess_read_landing: u8;
    static __uaccess_write_fault_site: u8;
    static __uaccess_write_landing: u8;
}

#[unsafe(naked)]
unsafe extern "C" fn read_user_byte_asm(addr: u32) -> i32 {
    naked_asm!(
        "mov eax, [esp+4]",
        ".global __uaccess_read_fault_site",
        "__uaccess_read_fault_site:",
        "movzx eax, byte ptr [eax]",
        "ret",
        ".global __uaccess_read_landing",
        "__uaccess_read_landing:",
        "mov eax, -1",
        "ret",
    )
}

#[unsafe(naked)]
unsafe extern "C" fn write_user_byte_asm(addr: u32, val: u32) -> i32 {
    naked_asm!(
        "mov eax, [esp+4]",
        "mov ecx, [esp+8]",
        ".global __uaccess_write_fault_site",
        "__uaccess_write_fault_site:",
        "mov [eax], cl",
        "xor eax, eax",
        "ret",
        ".global __uaccess_write_landing",
        "__uaccess_write_landing:",
        "mov eax, -1",
        "ret",
    )
}

/// Called from [`crate::mm::page_fault::handle`] for a fault taken in
/// kernel mode. Returns `true` (and rewrites `frame.eip`) only if the
/// fault happened at one of the two risky instructions above.
pub fn try_recover_fault(frame: &mut IsrFrame) -> bool {
    unsafe {
        let read_site = &raw const __uaccess_read_fault_site as u32;
        let read_landing = &raw const __uaccess_read_landing as u32;
        let write_site = &raw const __uaccess_write_fault_site as u32;
        let write_landing = &raw const __uaccess_write_landing as u32;
        if frame.eip == read_site {
            frame.eip = read_landing;
            return true;
        }
        if frame.eip == write_site {
            frame.eip = write_landing;
            return true;
        }
    }
    false
}

fn read_user_byte(addr: VirtAddr) -> Result<u8, Errno> {
    let v = unsafe { read_user_byte_asm(addr) };
    if v < 0 {
        Err(Errno::EFAULT)
    } else {
        Ok(v as u8)
    }
}

fn write_user_byte(addr: VirtAddr, val: u8) -> Result<(), Errno> {
    let v = unsafe { write_user_byte_asm(addr, val as u32) };
    if v < 0 {
        Err(Errno::EFAULT)
    } else {
        Ok(())
    }
}

/// Reject pointers/sizes that can never be legal regardless of VMAs:
/// kernel-half addresses and the policy caps.
fn check_bounds(addr: VirtAddr, len: usize, max_len: usize) -> Result<(), Errno> {
    if len > max_len {
        return Err(Errno::EINVAL);
    }
    if len == 0 {
        return Ok(());
    }
    let end = (addr as u64) + (len as u64);
    if end > KERNEL_VIRT_BASE as u64 {
        return Err(Errno::EFAULT);
    }
    Ok(())
}

/// Walk every page in `[addr, addr+len)`, requiring a VMA that actually
/// contains it (not just the next one over — stack growth is a real
/// fault's job, not a syscall argument's) with the requested permission,
/// faulting in anything not yet mapped so the byte copy that follows
/// doesn't have to.
fn validate_and_populate(mm: &MmStruct, addr: VirtAddr, len: usize, write: bool) -> Result<(), Errno> {
    if len == 0 {
        return Ok(());
    }
    let start = align_down(addr, PAGE_SIZE as u32);
    let end = align_up(addr + len as u32, PAGE_SIZE as u32);
    let mut page = start;
    while page < end {
        let vma = mm.find_vma(page).ok_or(Errno::EFAULT)?;
        if page < vma.start || page >= vma.end {
            return Err(Errno::EFAULT);
        }
        if !vma.flags.contains(VmaFlags::USER) || !vma.flags.contains(VmaFlags::READ) {
            return Err(Errno::EFAULT);
        }
        if write && !vma.flags.contains(VmaFlags::WRITE) {
            return Err(Errno::EFAULT);
        }
        if crate::mm::paging::walk(mm.pd_phys, page).is_none() {
            match mm.handle_fault(page, write, false) {
                crate::mm::vma::FaultOutcome::Resolved => {}
                crate::mm::vma::FaultOutcome::OutOfMemory => return Err(Errno::ENOMEM),
                crate::mm::vma::FaultOutcome::Killed => return Err(Errno::EFAULT),
            }
        }
        page += PAGE_SIZE as u32;
    }
    Ok(())
}

fn current_mm() -> Result<alloc::sync::Arc<MmStruct>, Errno> {
    crate::process::current_mm().ok_or(Errno::EFAULT)
}

/// Copy `len` bytes from `user_src` into a freshly allocated kernel
/// buffer. Used for read-side syscall arguments (`write`'s buffer,
/// `execve`'s argv strings).
pub fn copy_from_user(user_src: VirtAddr, len: usize) -> Result<Vec<u8>, Errno> {
    check_bounds(user_src, len, MAX_BUFFER_LEN)?;
    let mm = current_mm()?;
    validate_and_populate(&mm, user_src, len, false)?;
    let mut buf = Vec::with_capacity(len);
    for i in 0..len {
        buf.push(read_user_byte(user_src + i as u32)?);
    }
    Ok(buf)
}

/// Copy `src` into user memory at `user_dst`. Used for `read`'s result
/// buffer and `getcwd`/`getdents` output.
pub fn copy_to_user(user_dst: VirtAddr, src: &[u8]) -> Result<(), Errno> {
    check_bounds(user_dst, src.len(), MAX_BUFFER_LEN)?;
    let mm = current_mm()?;
    validate_and_populate(&mm, user_dst, src.len(), true)?;
    for (i, &byte) in src.iter().enumerate() {
        write_user_byte(user_dst + i as u32, byte)?;
    }
    Ok(())
}

/// Copy a NUL-terminated string out of user memory, up to `maxlen - 1`
/// bytes plus one probe byte to tell "fit" from "truncated".
pub fn copy_string_from_user(user_src: VirtAddr, maxlen: usize) -> Result<String, Errno> {
    check_bounds(user_src, maxlen, MAX_PATH_LEN)?;
    let mm = current_mm()?;
    validate_and_populate(&mm, user_src, maxlen, false)?;
    let mut bytes = Vec::with_capacity(maxlen.min(256));
    for i in 0..maxlen.saturating_sub(1) {
        let byte = read_user_byte(user_src + i as u32)?;
        if byte == 0 {
            return String::from_utf8(bytes).map_err(|_| Errno::EINVAL);
        }
        bytes.push(byte);
    }
    // Didn't see a NUL within maxlen - 1 bytes; probe one more to tell a
    // string that happens to end exactly there from one that's longer.
    let probe_addr = user_src + (maxlen - 1) as u32;
    check_bounds(probe_addr, 1, MAX_PATH_LEN)?;
    validate_and_populate(&mm, probe_addr, 1, false)?;
    let probe = read_user_byte(probe_addr)?;
    if probe == 0 {
        String::from_utf8(bytes).map_err(|_| Errno::EINVAL)
    } else {
        Err(Errno::ENAMETOOLONG)
    }
}

/// Validate an `argv`/`envp`-style NUL-terminated array of user string
/// pointers, as used by `execve`, bounded by `max_count` entries, and
/// copy each string into a kernel `Vec<String>`.
pub fn copy_string_array_from_user(user_argv: VirtAddr, max_count: usize) -> Result<Vec<String>, Errno> {
    let mut out = Vec::new();
    for i in 0..max_count {
        let entry_addr = user_argv + (i as u32) * 4;
        let ptr_bytes = copy_from_user(entry_addr, 4)?;
        let ptr = u32::from_le_bytes([ptr_bytes[0], ptr_bytes[1], ptr_bytes[2], ptr_bytes[3]]);
        if ptr == 0 {
            return Ok(out);
        }
        out.push(copy_string_from_user(ptr, MAX_ARG_LEN)?);
    }
    Err(Errno::E2BIG)
}
