//! `mm_struct` and VMA tree (C5): per-process address-space description
//! and the fault-servicing policy over it.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use super::paging::PageFlags;
use super::{PhysAddr, VirtAddr, PAGE_SIZE};
use crate::error::MmError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmaFlags: u32 {
        const READ        = 1 << 0;
        const WRITE       = 1 << 1;
        const EXEC        = 1 << 2;
        const USER        = 1 << 3;
        const GROWS_DOWN  = 1 << 4;
        const ANONYMOUS   = 1 << 5;
        const FILE_BACKED = 1 << 6;
    }
}

const STACK_GROWTH_LIMIT: u32 = 16 * PAGE_SIZE as u32;

#[derive(Debug, Clone, Copy)]
pub struct FileBacking {
    pub inode: u64,
    pub offset: u64,
}

/// A single virtual memory area: `[start, end)`.
#[derive(Debug, Clone, Copy)]
pub struct Vma {
    pub start: VirtAddr,
    pub end: VirtAddr,
    pub flags: VmaFlags,
    pub file: Option<FileBacking>,
}

impl Vma {
    fn protection(&self) -> PageFlags {
        let mut flags = PageFlags::PRESENT;
        if self.flags.contains(VmaFlags::WRITE) {
            flags |= PageFlags::WRITABLE;
        }
        if self.flags.contains(VmaFlags::USER) {
            flags |= PageFlags::USER;
        }
        flags
    }
}

/// VMAs keyed by start address, so `find_vma`/`insert_vma` are `O(log n)`
/// range queries over a `BTreeMap` rather than a hand-rolled tree.
pub struct MmStruct {
    pub pd_phys: PhysAddr,
    vmas: Mutex<BTreeMap<VirtAddr, Vma>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    Resolved,
    Killed,
    OutOfMemory,
}

impl MmStruct {
    pub fn new(pd_phys: PhysAddr) -> Self {
        Self {
            pd_phys,
            vmas: Mutex::new(BTreeMap::new()),
        }
    }

    /// The VMA containing `addr`, or the next-higher one if none does.
    pub fn find_vma(&self, addr: VirtAddr) -> Option<Vma> {
        let vmas = self.vmas.lock();
        if let Some((_, vma)) = vmas.range(..=addr).next_back() {
            if addr >= vma.start && addr < vma.end {
                return Some(*vma);
            }
        }
        vmas.range(addr..).next().map(|(_, v)| *v)
    }

    /// Insert a VMA, rejecting any overlap with an existing one.
    pub fn insert_vma(&self, vma: Vma) -> Result<(), MmError> {
        assert!(vma.start < vma.end, "VMA must be non-empty");
        assert_eq!(vma.start as usize % PAGE_SIZE, 0);
        assert_eq!(vma.end as usize % PAGE_SIZE, 0);
        let mut vmas = self.vmas.lock();
        if let Some((_, prev)) = vmas.range(..vma.start).next_back() {
            if prev.end > vma.start {
                return Err(MmError::VmaOverlap);
            }
        }
        if let Some((_, next)) = vmas.range(vma.start..).next() {
            if next.start < vma.end {
                return Err(MmError::VmaOverlap);
            }
        }
        vmas.insert(vma.start, vma);
        Ok(())
    }

    fn extend_stack_down(&self, vma_start: VirtAddr, new_start: VirtAddr) {
        let mut vmas = self.vmas.lock();
        if let Some(mut vma) = vmas.remove(&vma_start) {
            vma.start = new_start;
            vmas.insert(new_start, vma);
        }
    }

    pub fn vma_count(&self) -> usize {
        self.vmas.lock().len()
    }

    /// A point-in-time copy of every VMA, for `fork` to replay into a
    /// child's fresh `MmStruct`.
    pub fn vmas_snapshot(&self) -> Vec<Vma> {
        self.vmas.lock().values().copied().collect()
    }

    /// Service a page fault at `fault_addr`: look up the covering VMA (or
    /// grow the stack into it), check permissions, then fault in a frame.
    pub fn handle_fault(&self, fault_addr: VirtAddr, write: bool, exec: bool) -> FaultOutcome {
        let page_addr = super::align_down(fault_addr, PAGE_SIZE as u32);
        let mut vma = match self.find_vma(fault_addr) {
            Some(vma) if fault_addr >= vma.start && fault_addr < vma.end => vma,
            Some(next) if next.flags.contains(VmaFlags::GROWS_DOWN) && fault_addr + STACK_GROWTH_LIMIT >= next.start => {
                self.extend_stack_down(next.start, page_addr);
                let mut grown = next;
                grown.start = page_addr;
                grown
            }
            _ => return FaultOutcome::Killed,
        };
        let _ = &mut vma;

        if write && !vma.flags.contains(VmaFlags::WRITE) {
            return FaultOutcome::Killed;
        }
        if exec && !vma.flags.contains(VmaFlags::EXEC) {
            return FaultOutcome::Killed;
        }

        let Some(frame) = super::frame_allocator::frame_alloc() else {
            return FaultOutcome::OutOfMemory;
        };

        if vma.flags.contains(VmaFlags::ANONYMOUS) || vma.file.is_none() {
            super::paging::with_temp_map(frame, |ptr| unsafe {
                core::ptr::write_bytes(ptr, 0, PAGE_SIZE);
            });
        }
        // File-backed population beyond zero-fill is an optional extension;
        // anonymous-zero and stack growth are what's required.

        match super::paging::map_page(self.pd_phys, page_addr, frame, vma.protection()) {
            Ok(()) => FaultOutcome::Resolved,
            Err(_) => {
                super::frame_allocator::put_frame(frame);
                FaultOutcome::Killed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vma(start: u32, end: u32, flags: VmaFlags) -> Vma {
        Vma {
            start,
            end,
            flags,
            file: None,
        }
    }

    #[test]
    fn find_vma_returns_containing_or_next() {
        let mm = MmStruct::new(0);
        mm.insert_vma(vma(0x1000, 0x2000, VmaFlags::READ)).unwrap();
        mm.insert_vma(vma(0x5000, 0x6000, VmaFlags::READ)).unwrap();
        assert_eq!(mm.find_vma(0x1500).unwrap().start, 0x1000);
        assert_eq!(mm.find_vma(0x3000).unwrap().start, 0x5000);
        assert!(mm.find_vma(0x9000).is_none());
    }

    #[test]
    fn insert_rejects_overlap() {
        let mm = MmStruct::new(0);
        mm.insert_vma(vma(0x1000, 0x3000, VmaFlags::READ)).unwrap();
        assert_eq!(
            mm.insert_vma(vma(0x2000, 0x4000, VmaFlags::READ)),
            Err(MmError::VmaOverlap)
        );
        assert_eq!(mm.vma_count(), 1);
    }

    #[test]
    fn adjacent_vmas_are_not_overlapping() {
        let mm = MmStruct::new(0);
        mm.insert_vma(vma(0x1000, 0x2000, VmaFlags::READ)).unwrap();
        assert!(mm.insert_vma(vma(0x2000, 0x3000, VmaFlags::READ)).is_ok());
    }
}
