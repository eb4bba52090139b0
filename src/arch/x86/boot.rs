//! Multiboot2 header and the 32-bit protected-mode entry trampoline.
//!
//! GRUB (or any Multiboot2-compliant loader) drops us in 32-bit protected
//! mode with paging disabled and flat segments covering all 4 GiB. Before
//! any Rust code can run at its linked higher-half address we must build a
//! tiny boot page directory that maps the low 4 MiB both identically and at
//! `KERNEL_VIRT_BASE`, enable paging, and jump up.

use core::arch::global_asm;

/// Multiboot2 magic value the loader places in EAX on entry.
pub const MULTIBOOT2_MAGIC: u32 = 0x36d7_6289;

/// Virtual address the higher-half kernel is linked at (`link.ld`'s
/// `KERNEL_VIRT_BASE`); PDE index 768 of 1024.
pub const KERNEL_VIRT_BASE: usize = 0xC000_0000;

global_asm!(
    r#"
.section .multiboot_header, "a"
.align 8
multiboot_header_start:
    .long 0xe85250d6                // magic
    .long 0                         // architecture: 0 = i386 protected mode
    .long multiboot_header_end - multiboot_header_start
    .long -(0xe85250d6 + 0 + (multiboot_header_end - multiboot_header_start))
    .align 8
    .word 0                         // end tag: type
    .word 0                         // end tag: flags
    .long 8                         // end tag: size
multiboot_header_end:

.section .boot.bss, "aw", @nobits
.align 4096
boot_page_directory:
    .skip 4096
boot_stack_bottom:
    .skip 16384
boot_stack_top:

.section .boot.text, "ax"
.global _start
.code32
_start:
    cli
    mov $(boot_stack_top - 0xC0000000), %esp
    // preserve the multiboot magic (eax) and info pointer (ebx) on the
    // (still physically-addressed) boot stack across setup
    push %ebx
    push %eax

    // identity-map the first 16 MiB using four PSE large pages (indices
    // 0-3), giving paging::init() room to build the real kernel tables
    // out of directly-addressable memory before the recursive/temp-map
    // machinery exists.
    mov $(boot_page_directory - 0xC0000000), %edx
    mov $0, %ecx
2:
    mov %ecx, %eax
    shl $22, %eax
    or $0x83, %eax                     // present | write | page-size
    mov %eax, (%edx, %ecx, 4)          // identity: PDE[ecx]
    mov %eax, 768*4(%edx, %ecx, 4)     // higher-half alias: PDE[768+ecx]
    inc %ecx
    cmp $4, %ecx
    jl 2b

    // enable PSE (CR4.PSE, bit 4)
    mov %cr4, %ecx
    or $0x10, %ecx
    mov %ecx, %cr4

    // point CR3 at the boot page directory
    mov %edx, %ecx
    mov %ecx, %cr3

    // enable paging (CR0.PG, bit 31)
    mov %cr0, %ecx
    or $0x80000000, %ecx
    mov %ecx, %cr0

    lea higher_half, %ecx
    jmp *%ecx

.section .text
higher_half:
    // switch onto the higher-half-addressed stack, then recover the saved
    // magic/info pair and call into Rust
    mov $boot_stack_top, %esp
    mov $0, %ebp
    pop %eax                           // multiboot magic
    pop %ebx                           // multiboot info physical address
    push %ebx
    push %eax
    call x86_boot_main
    cli
1:  hlt
    jmp 1b
"#
);

unsafe extern "C" {
    /// Linker-provided symbol marking the end of the kernel image (`.bss`
    /// included), at its linked higher-half virtual address.
    static __kernel_end: u8;
    /// Same address, translated back to physical (`link.ld`).
    static __kernel_end_phys: u8;
    /// The boot page directory built by the trampoline above; its symbol
    /// address is already physical (`.boot.bss` is not relocated).
    static boot_page_directory: u8;
}

/// Physical (and, thanks to the low-16 MiB identity map, equally valid
/// virtual) address of the page directory the trampoline built and
/// switched to. [`super::paging::init`] extends this same table rather
/// than building a second one.
pub fn boot_page_directory_addr() -> u32 {
    unsafe { (&boot_page_directory) as *const u8 as u32 }
}

/// Bytes of low memory the trampoline identity-maps (and aliases into the
/// higher half): four 4 MiB PSE pages.
pub const BOOT_IDENTITY_MAP_SIZE: u32 = 4 * 4 * 1024 * 1024;

/// Physical address one past the last byte of the loaded kernel image;
/// the frame allocator (C1) must not hand out anything below this.
///
/// # Safety
/// Must only be called after the higher-half jump, once `__kernel_end_phys`
/// is a meaningful symbol (always true by the time Rust code runs).
pub unsafe fn kernel_phys_end() -> u32 {
    unsafe { (&__kernel_end_phys) as *const u8 as u32 }
}

/// Virtual address one past the last byte of the loaded kernel image.
pub fn kernel_virt_end() -> u32 {
    unsafe { (&__kernel_end) as *const u8 as u32 }
}
