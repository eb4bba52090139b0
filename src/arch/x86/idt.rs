//! Interrupt Descriptor Table.
//!
//! Exception vectors 0-31, the remapped PIC IRQs at 32-47, and the
//! syscall gate at 0x80. Each handler is a naked trampoline that pushes a
//! uniform [`IsrFrame`] and calls into the matching Rust function; the
//! trampoline itself is thin, mechanical glue (it's just table layout)
//! but the dispatch it calls into is core.

use core::arch::{asm, naked_asm};
use core::mem::size_of;

use lazy_static::lazy_static;

const IDT_ENTRIES: usize = 256;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

/// Register state captured by the trampolines, in the order the fault
/// handler and the syscall dispatcher both expect it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IsrFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

const PRESENT_RING0_INTERRUPT: u8 = 0x8E;
const PRESENT_RING3_INTERRUPT: u8 = 0xEE;

lazy_static! {
    static ref IDT: [IdtEntry; IDT_ENTRIES] = build_idt();
}

fn build_idt() -> [IdtEntry; IDT_ENTRIES] {
    let mut idt = [IdtEntry::missing(); IDT_ENTRIES];
    macro_rules! set {
        ($vec:expr, $handler:expr) => {
            idt[$vec] = IdtEntry::new(
                $handler as u32,
                super::gdt::KERNEL_CODE_SELECTOR,
                PRESENT_RING0_INTERRUPT,
            );
        };
    }
    set!(0, isr_stub_0);
    set!(6, isr_stub_6);
    set!(13, isr_stub_13);
    set!(14, isr_stub_14);
    set!(32, irq_stub_0);
    set!(33, irq_stub_1);
    idt[0x80] = IdtEntry::new(
        syscall_stub as u32,
        super::gdt::KERNEL_CODE_SELECTOR,
        PRESENT_RING3_INTERRUPT,
    );
    idt
}

/// # Safety
/// Must run once, after [`super::gdt::init`].
pub unsafe fn init() {
    let ptr = IdtPointer {
        limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
        base: (&*IDT).as_ptr() as u32,
    };
    asm!("lidt [{}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
}

macro_rules! isr_no_error_code {
    ($name:ident, $vector:literal) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym isr_common,
            )
        }
    };
}

macro_rules! isr_with_error_code {
    ($name:ident, $vector:literal) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() {
            naked_asm!(
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym isr_common,
            )
        }
    };
}

isr_no_error_code!(isr_stub_0, 0);
isr_with_error_code!(isr_stub_6, 6);
isr_with_error_code!(isr_stub_13, 13);
isr_with_error_code!(isr_stub_14, 14);
isr_no_error_code!(irq_stub_0, 32);
isr_no_error_code!(irq_stub_1, 33);
isr_no_error_code!(syscall_stub, 0x80);

#[unsafe(naked)]
unsafe extern "C" fn isr_common() {
    naked_asm!(
        "pusha",
        "push esp",
        "call {handler}",
        "add esp, 4",
        "popa",
        "add esp, 8", // pop vector + error_code
        "iretd",
        handler = sym dispatch,
    )
}

extern "C" fn dispatch(frame: *mut IsrFrame) {
    let frame = unsafe { &mut *frame };
    match frame.vector {
        0 => panic!("divide-by-zero at eip={:#010x}", { frame.eip }),
        6 => panic!("invalid opcode at eip={:#010x}", { frame.eip }),
        13 => crate::arch::x86::usermode::general_protection_fault(frame),
        14 => crate::mm::page_fault::handle(frame),
        32 => {
            super::pit::on_tick();
            crate::sched::scheduler::tick();
            super::pic::send_eoi(0);
        }
        33 => {
            super::keyboard::on_irq1();
            super::pic::send_eoi(1);
        }
        0x80 => crate::syscall::dispatch(frame),
        v => panic!("unhandled interrupt vector {v}"),
    }
}
