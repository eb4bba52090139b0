//! Paging / VMM (C4): x86-32, non-PAE, 2-level page tables. A single
//! top-level page directory (PD) of 1024 entries, each either a 4 MiB
//! large page or a pointer to a page table (PT) of 1024 4 KiB entries.
//!
//! Flag bit layout matches the hardware exactly (mirrored here rather
//! than pulled from a crate, the way `maestro-os`'s x86 vmem module does
//! it for the same non-PAE 32-bit case):
//!
//! bit0 present, bit1 writable, bit2 user, bit3 write-through, bit4
//! cache-disable, bit5 accessed, bit6 dirty, bit7 page-size/PAT, bit8
//! global, bits12-31 the 4 KiB-aligned physical frame number.

use bitflags::bitflags;
use spin::Mutex;

use super::{align_up, frame_allocator, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::arch::hal;
use crate::arch::x86::boot::{boot_page_directory_addr, BOOT_IDENTITY_MAP_SIZE, KERNEL_VIRT_BASE};
use crate::error::MmError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const PAGE_SIZE_BIT = 1 << 7;
        const GLOBAL        = 1 << 8;
    }
}

pub const ENTRIES_PER_TABLE: usize = 1024;
pub const USERSPACE_TABLES: usize = 768;
const FRAME_MASK: u32 = 0xFFFF_F000;

const RECURSIVE_INDEX: usize = 1023;
const TEMP_MAP_PDE_INDEX: usize = 1000;
const TEMP_MAP_VIRT: VirtAddr = (TEMP_MAP_PDE_INDEX * 4 * 1024 * 1024) as VirtAddr;
/// A second slot, one page above the first, so a directory and one of
/// its own (not-directly-addressable) page tables can be temp-mapped at
/// the same time without the single-slot lock self-deadlocking.
const TEMP_MAP_VIRT_2: VirtAddr = TEMP_MAP_VIRT + PAGE_SIZE as VirtAddr;
const HEAP_PDE_START: usize = 900;

/// The kernel page directory's physical address, set once by [`init`].
/// Identical across every process for the shared upper half; per-process
/// tables are separate frames whose entries [768, 1023) are copied from
/// this one at creation time.
static KERNEL_PD_PHYS: spin::Once<PhysAddr> = spin::Once::new();

fn phys_is_directly_addressable(addr: u32) -> bool {
    addr < BOOT_IDENTITY_MAP_SIZE
}

/// Read a frame's contents through whichever mapping makes it reachable:
/// directly, if it's within the always-identity-mapped low range, or
/// through the temp-map slot otherwise.
unsafe fn with_frame<R>(addr: PhysAddr, f: impl FnOnce(*mut u32) -> R) -> R {
    if phys_is_directly_addressable(addr) {
        f(addr as *mut u32)
    } else {
        with_temp_map(addr, |ptr| f(ptr as *mut u32))
    }
}

/// Bring up C4: extend the boot trampoline's page directory with a
/// recursive self-map entry and a dedicated page table backing the
/// temp-map slot. The boot directory (and its low 16 MiB identity/alias
/// large pages) stay in place rather than being rebuilt from scratch.
///
/// # Safety
/// Must run exactly once, after [`frame_allocator::init`], with the boot
/// trampoline's directory still loaded in CR3.
pub unsafe fn init() {
    let pd_phys = boot_page_directory_addr();
    assert!(phys_is_directly_addressable(pd_phys));

    unsafe {
        let pd = pd_phys as *mut u32;
        *pd.add(RECURSIVE_INDEX) = (pd_phys & FRAME_MASK) | PageFlags::PRESENT.bits() | PageFlags::WRITABLE.bits();

        let temp_pt_phys = frame_allocator::frame_alloc().expect("no frame for temp-map page table");
        assert!(phys_is_directly_addressable(temp_pt_phys));
        core::ptr::write_bytes(temp_pt_phys as *mut u8, 0, PAGE_SIZE);
        *pd.add(TEMP_MAP_PDE_INDEX) =
            (temp_pt_phys & FRAME_MASK) | PageFlags::PRESENT.bits() | PageFlags::WRITABLE.bits();
    }

    KERNEL_PD_PHYS.call_once(|| pd_phys);
    log::info!("paging: kernel directory extended at {pd_phys:#010x}, temp-map slot at {TEMP_MAP_VIRT:#010x}");
}

pub fn kernel_pd_phys() -> PhysAddr {
    *KERNEL_PD_PHYS.get().expect("paging::init not called")
}

static TEMP_MAP_LOCK: Mutex<()> = Mutex::new(());
static TEMP_MAP_LOCK_2: Mutex<()> = Mutex::new(());

fn bind_slot(pte_offset: usize, slot_virt: VirtAddr, addr: PhysAddr) {
    let pt = kernel_pd_temp_pt_virt() as *mut u32;
    unsafe {
        *pt.add(pte_offset) = (addr & FRAME_MASK) | PageFlags::PRESENT.bits() | PageFlags::WRITABLE.bits();
    }
    hal::flush_tlb_page(slot_virt as usize);
}

fn unbind_slot(pte_offset: usize, slot_virt: VirtAddr) {
    let pt = kernel_pd_temp_pt_virt() as *mut u32;
    unsafe {
        *pt.add(pte_offset) = 0;
    }
    hal::flush_tlb_page(slot_virt as usize);
}

/// Bind `addr` at the first temp-map virtual page for the duration of
/// `f`, then unbind it. IRQ-safe: callers may be servicing a page fault.
pub fn with_temp_map<R>(addr: PhysAddr, f: impl FnOnce(*mut u8) -> R) -> R {
    hal::without_interrupts(|| {
        let _guard = TEMP_MAP_LOCK.lock();
        bind_slot(0, TEMP_MAP_VIRT, addr);
        let result = f(TEMP_MAP_VIRT as *mut u8);
        unbind_slot(0, TEMP_MAP_VIRT);
        result
    })
}

/// Bind `addr` at the second temp-map slot. Only ever used nested inside
/// an outer [`with_temp_map`]/direct access for the containing table, so
/// it takes a distinct lock.
fn with_temp_map_2<R>(addr: PhysAddr, f: impl FnOnce(*mut u8) -> R) -> R {
    hal::without_interrupts(|| {
        let _guard = TEMP_MAP_LOCK_2.lock();
        bind_slot(1, TEMP_MAP_VIRT_2, addr);
        let result = f(TEMP_MAP_VIRT_2 as *mut u8);
        unbind_slot(1, TEMP_MAP_VIRT_2);
        result
    })
}

/// Access a second-level table given the caller already holds a pointer
/// (direct or slot-0 temp-mapped) to its directory. Uses slot 1 so it
/// never contends with a slot-0 mapping still in scope.
unsafe fn with_frame_2<R>(addr: PhysAddr, f: impl FnOnce(*mut u32) -> R) -> R {
    if phys_is_directly_addressable(addr) {
        f(addr as *mut u32)
    } else {
        with_temp_map_2(addr, |ptr| f(ptr as *mut u32))
    }
}

/// Virtual address of the temp-map slots' own backing page table, which
/// (being part of the shared kernel range) is directly addressable once
/// [`init`] has run, through the same low identity mapping the rest of
/// this module relies on.
fn kernel_pd_temp_pt_virt() -> u32 {
    let pd_phys = kernel_pd_phys();
    let entry = unsafe { *(pd_phys as *const u32).add(TEMP_MAP_PDE_INDEX) };
    entry & FRAME_MASK
}

/// Split a virtual address into (PDE index, PTE index, page offset).
fn split(vaddr: VirtAddr) -> (usize, usize, usize) {
    let v = vaddr as usize;
    (v >> 22, (v >> 12) & 0x3FF, v & 0xFFF)
}

/// Map one 4 KiB page into `pd_phys`'s address space, allocating the
/// backing page table lazily if needed.
pub fn map_page(pd_phys: PhysAddr, vaddr: VirtAddr, paddr: PhysAddr, flags: PageFlags) -> Result<(), MmError> {
    if vaddr as usize % PAGE_SIZE != 0 || paddr as usize % PAGE_SIZE != 0 {
        return Err(MmError::NotAligned);
    }
    let (pde_index, pte_index, _) = split(vaddr);
    unsafe {
        with_frame(pd_phys, |pd| {
            let mut pde = *pd.add(pde_index);
            if pde & PageFlags::PRESENT.bits() == 0 {
                let pt_phys = frame_allocator::frame_alloc().ok_or(MmError::OutOfFrames)?;
                with_frame_2(pt_phys, |pt| core::ptr::write_bytes(pt as *mut u8, 0, PAGE_SIZE));
                pde = (pt_phys & FRAME_MASK) | PageFlags::PRESENT.bits() | PageFlags::WRITABLE.bits()
                    | if flags.contains(PageFlags::USER) { PageFlags::USER.bits() } else { 0 };
                *pd.add(pde_index) = pde;
            }
            let pt_phys = pde & FRAME_MASK;
            with_frame_2(pt_phys, |pt| {
                let existing = *pt.add(pte_index);
                if existing & PageFlags::PRESENT.bits() != 0 {
                    return Err(MmError::AddressAlreadyMapped);
                }
                *pt.add(pte_index) = (paddr & FRAME_MASK) | flags.bits();
                Ok(())
            })
        })
    }?;
    hal::flush_tlb_page(vaddr as usize);
    Ok(())
}

/// Unmap one page, returning the physical frame that was backing it.
pub fn unmap_page(pd_phys: PhysAddr, vaddr: VirtAddr) -> Result<PhysAddr, MmError> {
    let (pde_index, pte_index, _) = split(vaddr);
    let result = unsafe {
        with_frame(pd_phys, |pd| {
            let pde = *pd.add(pde_index);
            if pde & PageFlags::PRESENT.bits() == 0 {
                return Err(MmError::AddressNotMapped);
            }
            let pt_phys = pde & FRAME_MASK;
            with_frame_2(pt_phys, |pt| {
                let pte = *pt.add(pte_index);
                if pte & PageFlags::PRESENT.bits() == 0 {
                    return Err(MmError::AddressNotMapped);
                }
                *pt.add(pte_index) = 0;
                Ok(pte & FRAME_MASK)
            })
        })
    }?;
    hal::flush_tlb_page(vaddr as usize);
    Ok(result)
}

/// Look up the physical address and flags backing `vaddr` in `pd_phys`.
pub fn walk(pd_phys: PhysAddr, vaddr: VirtAddr) -> Option<(PhysAddr, PageFlags)> {
    let (pde_index, pte_index, offset) = split(vaddr);
    unsafe {
        with_frame(pd_phys, |pd| {
            let pde = *pd.add(pde_index);
            if pde & PageFlags::PRESENT.bits() == 0 {
                return None;
            }
            if pde & PageFlags::PAGE_SIZE_BIT.bits() != 0 {
                let base = pde & 0xFFC0_0000;
                return Some((base + offset as u32, PageFlags::from_bits_truncate(pde)));
            }
            let pt_phys = pde & FRAME_MASK;
            with_frame_2(pt_phys, |pt| {
                let pte = *pt.add(pte_index);
                if pte & PageFlags::PRESENT.bits() == 0 {
                    return None;
                }
                Some((pte & FRAME_MASK, PageFlags::from_bits_truncate(pte)))
            })
        })
    }
}

/// Copy one physical frame's contents into another, for `fork`'s eager
/// page duplication. Uses both temp-map slots at once so source and
/// destination are simultaneously addressable.
pub fn copy_frame(src: PhysAddr, dst: PhysAddr) {
    with_temp_map(dst, |dst_ptr| {
        with_temp_map_2(src, |src_ptr| unsafe {
            core::ptr::copy_nonoverlapping(src_ptr, dst_ptr, PAGE_SIZE);
        });
    });
}

/// Build a fresh top-level table for a new process: kernel entries
/// `[USERSPACE_TABLES, 1024)` are copied by value (pointing at the same
/// second-level tables as the kernel's own directory), the recursive slot
/// points at the new table itself, and the user half starts empty.
pub fn clone_kernel_space() -> Result<PhysAddr, MmError> {
    let new_pd_phys = frame_allocator::frame_alloc().ok_or(MmError::OutOfFrames)?;
    with_temp_map(new_pd_phys, |new_pd_ptr| {
        let new_pd = new_pd_ptr as *mut u32;
        unsafe {
            core::ptr::write_bytes(new_pd_ptr, 0, PAGE_SIZE);
            with_frame(kernel_pd_phys(), |kernel_pd| {
                for i in USERSPACE_TABLES..RECURSIVE_INDEX {
                    *new_pd.add(i) = *kernel_pd.add(i);
                }
            });
            *new_pd.add(RECURSIVE_INDEX) = (new_pd_phys & FRAME_MASK) | PageFlags::PRESENT.bits() | PageFlags::WRITABLE.bits();
        }
    });
    Ok(new_pd_phys)
}

/// Tear down every user-half mapping in `pd_phys`, freeing backing frames
/// and second-level tables, but leaving the top-level frame itself for
/// the caller (the PCB) to free.
pub fn destroy_user_space(pd_phys: PhysAddr) {
    unsafe {
        with_frame(pd_phys, |pd| {
            for pde_index in 0..USERSPACE_TABLES {
                let pde = *pd.add(pde_index);
                if pde & PageFlags::PRESENT.bits() == 0 {
                    continue;
                }
                let pt_phys = pde & FRAME_MASK;
                with_frame_2(pt_phys, |pt| {
                    for pte_index in 0..ENTRIES_PER_TABLE {
                        let pte = *pt.add(pte_index);
                        if pte & PageFlags::PRESENT.bits() != 0 {
                            frame_allocator::put_frame(pte & FRAME_MASK);
                        }
                    }
                });
                frame_allocator::put_frame(pt_phys);
                *pd.add(pde_index) = 0;
            }
        });
    }
}

/// Bump-reserve `size` bytes (a power of two) of kernel virtual address
/// space for C2's buddy region and eagerly back it with frames. Only
/// called once, from [`super::kmalloc::init`].
pub fn reserve_kernel_heap_region(size: usize) -> usize {
    let pages = size.div_ceil(PAGE_SIZE);
    let base = (HEAP_PDE_START * 4 * 1024 * 1024) as usize;
    for i in 0..pages {
        let vaddr = align_up(base as u32 + (i * PAGE_SIZE) as u32, PAGE_SIZE as u32);
        let paddr = frame_allocator::frame_alloc().expect("out of frames bringing up the kernel heap");
        map_page(
            kernel_pd_phys(),
            vaddr,
            paddr,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::GLOBAL,
        )
        .expect("kernel heap region must not already be mapped");
    }
    base
}

/// Virtual address range the kernel stack bump allocator (C6) draws
/// from.
pub const KERNEL_STACK_VIRT_START: usize = 0xF000_0000;
pub const KERNEL_STACK_VIRT_END: usize = TEMP_MAP_VIRT as usize;

#[allow(dead_code)]
fn _assert_layout() {
    debug_assert!(KERNEL_VIRT_BASE < KERNEL_STACK_VIRT_START);
}
