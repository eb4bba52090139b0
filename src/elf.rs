//! ELF32 byte-format decoding. Kept to a narrow
//! interface on purpose: this module only understands enough of the ELF32
//! header and program-header table to yield [`ProgramSegment`]s and an
//! entry point; `process::create` is the only caller, and it never
//! inspects a raw byte offset itself.

use crate::error::ProcessError;
use crate::mm::VirtAddr;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;

pub const PF_X: u32 = 1 << 0;
pub const PF_W: u32 = 1 << 1;
pub const PF_R: u32 = 1 << 2;

/// One `PT_LOAD` program header, the only segment type this core maps.
#[derive(Debug, Clone, Copy)]
pub struct ProgramSegment {
    pub vaddr: VirtAddr,
    pub file_off: u32,
    pub file_size: u32,
    pub mem_size: u32,
    pub flags: u32,
}

pub struct ElfImage<'a> {
    bytes: &'a [u8],
    phoff: u32,
    phentsize: u16,
    phnum: u16,
    pub entry_point: VirtAddr,
}

fn read_u16(bytes: &[u8], off: usize) -> Option<u16> {
    bytes.get(off..off + 2).map(|s| u16::from_le_bytes([s[0], s[1]]))
}

fn read_u32(bytes: &[u8], off: usize) -> Option<u32> {
    bytes
        .get(off..off + 4)
        .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

impl<'a> ElfImage<'a> {
    /// Validate the ELF32 header and locate the program-header table.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ProcessError> {
        if bytes.len() < 52 || bytes[0..4] != ELF_MAGIC {
            return Err(ProcessError::ElfMalformed);
        }
        let ei_class = bytes[4];
        if ei_class != 1 {
            // not ELFCLASS32
            return Err(ProcessError::ElfMalformed);
        }
        let e_type = read_u16(bytes, 16).ok_or(ProcessError::ElfMalformed)?;
        if e_type != ET_EXEC {
            return Err(ProcessError::ElfMalformed);
        }
        let entry_point = read_u32(bytes, 24).ok_or(ProcessError::ElfMalformed)?;
        let phoff = read_u32(bytes, 28).ok_or(ProcessError::ElfMalformed)?;
        let phentsize = read_u16(bytes, 42).ok_or(ProcessError::ElfMalformed)?;
        let phnum = read_u16(bytes, 44).ok_or(ProcessError::ElfMalformed)?;
        if phentsize < 32 {
            return Err(ProcessError::ElfMalformed);
        }
        Ok(Self {
            bytes,
            phoff,
            phentsize,
            phnum,
            entry_point,
        })
    }

    /// Yield every `PT_LOAD` segment in file order.
    pub fn segments(&self) -> impl Iterator<Item = Result<ProgramSegment, ProcessError>> + '_ {
        (0..self.phnum as usize).filter_map(move |i| {
            let base = self.phoff as usize + i * self.phentsize as usize;
            let header = &self.bytes.get(base..base + 32)?;
            let p_type = read_u32(header, 0)?;
            if p_type != PT_LOAD {
                return None;
            }
            let file_off = read_u32(header, 4)?;
            let vaddr = read_u32(header, 8)?;
            let file_size = read_u32(header, 16)?;
            let mem_size = read_u32(header, 20)?;
            let flags = read_u32(header, 24)?;
            if mem_size < file_size {
                return Some(Err(ProcessError::ElfMalformed));
            }
            Some(Ok(ProgramSegment {
                vaddr,
                file_off,
                file_size,
                mem_size,
                flags,
            }))
        })
    }

    pub fn segment_bytes(&self, segment: &ProgramSegment) -> Result<&'a [u8], ProcessError> {
        let start = segment.file_off as usize;
        let end = start + segment.file_size as usize;
        self.bytes.get(start..end).ok_or(ProcessError::ElfMalformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn build_minimal_elf(entry: u32, segment: (u32, u32, u32, u32, u32)) -> Vec<u8> {
        let mut bytes = alloc::vec![0u8; 52];
        bytes[0..4].copy_from_slice(&ELF_MAGIC);
        bytes[4] = 1; // ELFCLASS32
        bytes[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        bytes[24..28].copy_from_slice(&entry.to_le_bytes());
        bytes[28..32].copy_from_slice(&52u32.to_le_bytes()); // phoff
        bytes[42..44].copy_from_slice(&32u16.to_le_bytes()); // phentsize
        bytes[44..46].copy_from_slice(&1u16.to_le_bytes()); // phnum

        let mut ph = alloc::vec![0u8; 32];
        ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
        ph[4..8].copy_from_slice(&segment.0.to_le_bytes()); // file_off
        ph[8..12].copy_from_slice(&segment.1.to_le_bytes()); // vaddr
        ph[16..20].copy_from_slice(&segment.2.to_le_bytes()); // file_size
        ph[20..24].copy_from_slice(&segment.3.to_le_bytes()); // mem_size
        ph[24..28].copy_from_slice(&segment.4.to_le_bytes()); // flags
        bytes.extend_from_slice(&ph);
        bytes
    }

    #[test]
    fn parses_entry_point_and_one_load_segment() {
        let bytes = build_minimal_elf(0x0804_8000, (84, 0x0804_8000, 4, 4, PF_R | PF_X));
        let image = ElfImage::parse(&bytes).unwrap();
        assert_eq!(image.entry_point, 0x0804_8000);
        let segments: Vec<_> = image.segments().collect::<Result<_, _>>().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].vaddr, 0x0804_8000);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_minimal_elf(0, (52, 0, 0, 0, 0));
        bytes[0] = 0;
        assert_eq!(ElfImage::parse(&bytes).unwrap_err(), ProcessError::ElfMalformed);
    }

    #[test]
    fn rejects_mem_size_smaller_than_file_size() {
        let bytes = build_minimal_elf(0x1000, (52, 0x1000, 100, 10, PF_R));
        let image = ElfImage::parse(&bytes).unwrap();
        let result: Result<Vec<_>, _> = image.segments().collect();
        assert!(result.is_err());
    }
}
