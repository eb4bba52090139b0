//! Global Descriptor Table: flat 4 GiB segments plus a TSS for ring 3 ->
//! ring 0 stack switches.
//!
//! The x86-32 descriptor *encoding* is fixed by the hardware; what the
//! core owns is *which* entries exist and their selectors, since the
//! scheduler and the IRET path hard-code them.

use core::arch::asm;
use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x18 | 3;
pub const USER_DATA_SELECTOR: u16 = 0x20 | 3;
const TSS_SELECTOR: u16 = 0x28;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    const fn flat(access: u8, gran: u8) -> Self {
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            granularity: 0xC0 | gran,
            base_high: 0,
        }
    }

    fn tss(base: u32, limit: u32) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access: 0x89, // present, ring0, 32-bit TSS (available)
            granularity: (((limit >> 16) & 0x0F) as u8) & 0x0F,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

/// Task State Segment. On x86-32 only `esp0`/`ss0` (the ring-0 stack used
/// on a privilege-level change) and the I/O bitmap offset matter to us;
/// hardware task-switching is not used.
#[repr(C, packed)]
pub struct Tss {
    prev_task: u32,
    pub esp0: u32,
    pub ss0: u32,
    _rest: [u32; 22],
    _ldt: u16,
    _trap: u16,
    _iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Self {
            prev_task: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SELECTOR as u32,
            _rest: [0; 22],
            _ldt: 0,
            _trap: 0,
            _iomap_base: size_of::<Tss>() as u16,
        }
    }
}

pub static TSS: Mutex<Tss> = Mutex::new(Tss::new());

lazy_static! {
    static ref GDT: [GdtEntry; 6] = {
        let tss_addr = &raw const TSS as u32;
        [
            GdtEntry::null(),
            GdtEntry::flat(0x9A, 0x0F), // kernel code: present, ring0, exec/read
            GdtEntry::flat(0x92, 0x0F), // kernel data: present, ring0, read/write
            GdtEntry::flat(0xFA, 0x0F), // user code: present, ring3, exec/read
            GdtEntry::flat(0xF2, 0x0F), // user data: present, ring3, read/write
            GdtEntry::tss(tss_addr, size_of::<Tss>() as u32 - 1),
        ]
    };
}

/// Install the GDT and TSS and load the segment registers.
///
/// # Safety
/// Must run once, early, before any ring transition or segment reload.
pub unsafe fn init() {
    let gdt_ptr = DescriptorTablePointer {
        limit: (size_of::<[GdtEntry; 6]>() - 1) as u16,
        base: (&*GDT).as_ptr() as u32,
    };
    asm!("lgdt [{}]", in(reg) &gdt_ptr, options(readonly, nostack, preserves_flags));
    reload_segments();
    asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nostack, preserves_flags));
}

unsafe fn reload_segments() {
    asm!(
        "push {code_sel}",
        "lea eax, [2f]",
        "push eax",
        "retf",
        "2:",
        "mov ax, {data_sel:x}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        code_sel = in(reg) KERNEL_CODE_SELECTOR as u32,
        data_sel = in(reg) KERNEL_DATA_SELECTOR,
        out("eax") _,
    );
}

/// Update `TSS.esp0` to the new task's kernel-stack top before every
/// context switch so the next ring3->ring0 transition lands on the right
/// stack.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}
