//! Multiboot2 information-block parsing (C1's input, C16's command line).
//!
//! The tag-stream *format* is fixed by the Multiboot2 specification, an
//! external contract the bootloader and this kernel both honor; walking
//! it to recover the memory map and command line is core, since the frame
//! allocator and boot configuration both depend on getting it right.

use core::slice;
use core::str;

const TAG_END: u32 = 0;
const TAG_CMDLINE: u32 = 1;
const TAG_MEMORY_MAP: u32 = 6;

#[repr(C)]
struct TagHeader {
    tag_type: u32,
    size: u32,
}

/// One usable or reserved range from the Multiboot2 memory map tag.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub usable: bool,
}

const MAX_REGIONS: usize = 64;

/// Everything the kernel pulls out of the Multiboot2 info block before
/// independence from it (the block itself may be reclaimed once this is
/// built).
pub struct BootInfo {
    regions: [MemoryRegion; MAX_REGIONS],
    region_count: usize,
    cmdline_ptr: *const u8,
    cmdline_len: usize,
}

impl BootInfo {
    /// Parse the tag stream at `info_addr` (the physical address GRUB left
    /// in `%ebx`, now identity-aliased into the higher half).
    ///
    /// # Safety
    /// `info_addr` must be the untouched physical address handed off by a
    /// Multiboot2-compliant bootloader, readable for at least the `total_size`
    /// the block itself declares.
    pub unsafe fn from_multiboot2(info_addr: u32) -> Self {
        let virt = info_addr as usize + crate::arch::x86::boot::KERNEL_VIRT_BASE;
        let total_size = unsafe { *(virt as *const u32) };
        let mut regions = [MemoryRegion {
            base: 0,
            length: 0,
            usable: false,
        }; MAX_REGIONS];
        let mut region_count = 0usize;
        let mut cmdline_ptr = core::ptr::null();
        let mut cmdline_len = 0usize;

        let mut offset = 8usize; // skip total_size + reserved
        while offset < total_size as usize {
            let header = unsafe { &*((virt + offset) as *const TagHeader) };
            if header.tag_type == TAG_END {
                break;
            }
            match header.tag_type {
                TAG_CMDLINE => {
                    let str_start = virt + offset + core::mem::size_of::<TagHeader>();
                    let str_len = (header.size as usize)
                        .saturating_sub(core::mem::size_of::<TagHeader>())
                        .saturating_sub(1); // trailing NUL
                    cmdline_ptr = str_start as *const u8;
                    cmdline_len = str_len;
                }
                TAG_MEMORY_MAP => {
                    let entry_size =
                        unsafe { *((virt + offset + 8) as *const u32) } as usize;
                    let entries_start = virt + offset + 16;
                    let entries_end = virt + offset + header.size as usize;
                    let mut p = entries_start;
                    while p + entry_size <= entries_end && region_count < MAX_REGIONS {
                        let base = unsafe { *(p as *const u64) };
                        let length = unsafe { *((p + 8) as *const u64) };
                        let kind = unsafe { *((p + 16) as *const u32) };
                        regions[region_count] = MemoryRegion {
                            base,
                            length,
                            usable: kind == 1,
                        };
                        region_count += 1;
                        p += entry_size;
                    }
                }
                _ => {}
            }
            // Tags are 8-byte aligned.
            offset += (header.size as usize + 7) & !7;
        }

        Self {
            regions,
            region_count,
            cmdline_ptr,
            cmdline_len,
        }
    }

    pub fn memory_regions(&self) -> &[MemoryRegion] {
        &self.regions[..self.region_count]
    }

    pub fn command_line(&self) -> &str {
        if self.cmdline_ptr.is_null() {
            return "";
        }
        let bytes = unsafe { slice::from_raw_parts(self.cmdline_ptr, self.cmdline_len) };
        str::from_utf8(bytes).unwrap_or("")
    }
}
