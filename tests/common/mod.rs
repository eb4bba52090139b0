//! Shared helpers for the bare-metal integration binaries under `tests/`.
//! Each test binary is its own `#![no_std]` crate (no access to
//! `coal_kernel`'s private items), so anything a test needs to *build*
//! rather than just call through the public API lives here instead of
//! being reused from `src/elf.rs`'s own unit tests.

#![allow(dead_code)]

extern crate alloc;

use alloc::vec::Vec;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;

pub const PF_X: u32 = 1 << 0;
pub const PF_R: u32 = 1 << 2;

/// A minimal, otherwise-empty ELF32 executable with one `PT_LOAD` segment,
/// mirroring the shape `src/elf.rs`'s own parser test builds. `code` is
/// placed at the start of that segment and becomes the process's entry
/// point.
pub fn build_minimal_elf(vaddr: u32, code: &[u8]) -> Vec<u8> {
    let mem_size = code.len() as u32;
    let mut bytes = alloc::vec![0u8; 52];
    bytes[0..4].copy_from_slice(&ELF_MAGIC);
    bytes[4] = 1; // ELFCLASS32
    bytes[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
    bytes[24..28].copy_from_slice(&vaddr.to_le_bytes()); // e_entry
    bytes[28..32].copy_from_slice(&52u32.to_le_bytes()); // e_phoff
    bytes[42..44].copy_from_slice(&32u16.to_le_bytes()); // e_phentsize
    bytes[44..46].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

    let file_off = 52 + 32;
    let mut ph = alloc::vec![0u8; 32];
    ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
    ph[4..8].copy_from_slice(&(file_off as u32).to_le_bytes());
    ph[8..12].copy_from_slice(&vaddr.to_le_bytes());
    ph[16..20].copy_from_slice(&mem_size.to_le_bytes());
    ph[20..24].copy_from_slice(&mem_size.to_le_bytes());
    ph[24..28].copy_from_slice(&(PF_R | PF_X).to_le_bytes());
    bytes.extend_from_slice(&ph);
    bytes.extend_from_slice(code);
    bytes
}

/// `cli; hlt; jmp .` — the smallest loop that behaves once a process
/// actually reaches user mode without needing any syscall support from
/// the test itself.
pub const HALT_LOOP: [u8; 4] = [0xfa, 0xf4, 0xeb, 0xfd];

/// Register a single-file initrd built by [`build_minimal_elf`] as
/// `/bin/init`, leaking it to get the `'static` lifetime
/// `vfs::set_initrd_files` requires — fine for a one-shot test binary
/// that never tears the kernel back down.
pub fn install_test_init(vaddr: u32, code: &[u8]) {
    let elf = build_minimal_elf(vaddr, code);
    let leaked: &'static [u8] = alloc::boxed::Box::leak(elf.into_boxed_slice());
    coal_kernel::vfs::set_initrd_files(alloc::vec![("/bin/init", leaked)]);
}
