//! Kernel-stack allocation with a guard page.
//!
//! Virtual addresses are handed out by a simple bump allocator over
//! `[KERNEL_STACK_VIRT_START, KERNEL_STACK_VIRT_END)`; the range is never
//! recycled, which is fine for a pedagogical kernel's process lifetime.

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::MmError;
use crate::mm::paging::{self, PageFlags, KERNEL_STACK_VIRT_END, KERNEL_STACK_VIRT_START};
use crate::mm::{frame_allocator, PhysAddr, VirtAddr, PAGE_SIZE};

/// 4 pages of usable stack; matches the ~16 KiB a small kernel thread
/// needs for syscall handling and the interrupt frame.
pub const PROCESS_KSTACK_SIZE: usize = 4 * PAGE_SIZE;
const KSTACK_PAGES: usize = PROCESS_KSTACK_SIZE / PAGE_SIZE;

static BUMP_CURSOR: Mutex<VirtAddr> = Mutex::new(KERNEL_STACK_VIRT_START as VirtAddr);

fn reserve_virtual_range(pages: usize) -> Result<VirtAddr, MmError> {
    let mut cursor = BUMP_CURSOR.lock();
    let size = (pages * PAGE_SIZE) as VirtAddr;
    let base = *cursor;
    let next = base.checked_add(size).ok_or(MmError::OutOfVirtualSpace)?;
    if next as usize > KERNEL_STACK_VIRT_END {
        return Err(MmError::OutOfVirtualSpace);
    }
    *cursor = next;
    Ok(base)
}

/// A process's kernel stack: `KSTACK_PAGES` mapped frames, topped by
/// `virt_top`, with one unmapped guard page immediately below the usable
/// range.
pub struct KernelStack {
    pub virt_top: VirtAddr,
    pub guard_virt: VirtAddr,
    frames: Vec<PhysAddr>,
}

impl KernelStack {
    /// Allocate, map and write-test a fresh kernel stack. On any failure
    /// every frame and mapping made so far is rolled back.
    pub fn alloc() -> Result<Self, MmError> {
        let range_base = reserve_virtual_range(KSTACK_PAGES + 1)?;
        let guard_virt = range_base;
        let usable_base = range_base + PAGE_SIZE as VirtAddr;

        let mut frames = Vec::with_capacity(KSTACK_PAGES);
        let pd_phys = paging::kernel_pd_phys();
        let result = (|| -> Result<(), MmError> {
            for i in 0..KSTACK_PAGES {
                let frame = frame_allocator::frame_alloc().ok_or(MmError::OutOfFrames)?;
                frames.push(frame);
                let vaddr = usable_base + (i * PAGE_SIZE) as VirtAddr;
                paging::map_page(pd_phys, vaddr, frame, PageFlags::PRESENT | PageFlags::WRITABLE)?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            for (i, frame) in frames.iter().enumerate() {
                let vaddr = usable_base + (i * PAGE_SIZE) as VirtAddr;
                let _ = paging::unmap_page(pd_phys, vaddr);
                frame_allocator::put_frame(*frame);
            }
            return Err(e);
        }

        let virt_top = usable_base + PROCESS_KSTACK_SIZE as VirtAddr;
        unsafe {
            write_test_word(usable_base);
            write_test_word(virt_top - 4);
        }

        Ok(Self {
            virt_top,
            guard_virt,
            frames,
        })
    }

    /// Free the backing physical frames. The virtual mappings are
    /// intentionally left in place (and the virtual range is never
    /// reused) — only the frames are returned to the pool.
    pub fn free(self) {
        for frame in self.frames {
            frame_allocator::put_frame(frame);
        }
    }
}

unsafe fn write_test_word(addr: VirtAddr) {
    let ptr = addr as *mut u32;
    unsafe {
        let saved = ptr.read_volatile();
        ptr.write_volatile(0xA5A5_A5A5);
        assert_eq!(ptr.read_volatile(), 0xA5A5_A5A5, "kernel stack write-test failed");
        ptr.write_volatile(saved);
    }
}
