//! First entry into ring 3 and the #GP handler that catches a process
//! tripping over a bad selector or privileged instruction.

use core::arch::{asm, naked_asm};

use super::gdt::{self, USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use super::idt::IsrFrame;
use crate::mm::VirtAddr;
use crate::process::lifecycle::ExitReason;

/// The five words an `iretd` that crosses from ring 0 to ring 3 expects on
/// the stack, pushed in reverse order: `eip, cs, eflags, esp, ss`.
#[repr(C)]
pub struct IretFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

const EFLAGS_RESERVED_BIT1: u32 = 0x2;
const EFLAGS_IF: u32 = 0x200;

/// Build the initial [`IretFrame`] for a process's very first run:
/// interrupts enabled, ring 3 selectors, entry point and stack from the
/// ELF loader.
pub fn first_run_frame(entry_point: u32, user_stack_top: u32) -> IretFrame {
    IretFrame {
        eip: entry_point,
        cs: USER_CODE_SELECTOR as u32,
        eflags: EFLAGS_RESERVED_BIT1 | EFLAGS_IF,
        esp: user_stack_top,
        ss: USER_DATA_SELECTOR as u32,
    }
}

/// Jump to ring 3 using a frame built by [`first_run_frame`]. Never
/// returns; the process runs until its first trap back into the kernel.
///
/// # Safety
/// Must run on the target process's own kernel stack, with
/// `gdt::set_kernel_stack` already pointed at that stack, and `frame` must
/// describe a validated user entry point and stack (demand paging will
/// fault in the first page on first access).
pub unsafe fn enter_user_mode(frame: &IretFrame) -> ! {
    asm!(
        "push {ss}",
        "push {esp}",
        "push {eflags}",
        "push {cs}",
        "push {eip}",
        "iretd",
        ss = in(reg) frame.ss,
        esp = in(reg) frame.esp,
        eflags = in(reg) frame.eflags,
        cs = in(reg) frame.cs,
        eip = in(reg) frame.eip,
        options(noreturn),
    )
}

/// Build the initial kernel-stack frame so a task's very
/// first [`super::context::switch_to`] lands in [`first_run_trampoline`]
/// instead of a normal `ret` — the same push/pop convention `switch_to`
/// itself uses, just primed by hand instead of saved by a real switch.
/// Returns the `esp` to record as the task's saved context.
pub fn prepare_first_run(kernel_stack_top: VirtAddr) -> u32 {
    let mut addr = kernel_stack_top;
    unsafe {
        addr -= 4;
        (addr as *mut u32).write(first_run_trampoline as usize as u32); // return address
        for _ in 0..4 {
            addr -= 4;
            (addr as *mut u32).write(0); // edi, esi, ebp, ebx
        }
    }
    addr
}

/// Where a freshly primed task's first switch-to lands: build the IRET
/// frame from the current task's PCB and drop to ring 3.
extern "C" fn first_run_trampoline() -> ! {
    let pcb = crate::sched::scheduler::current_pcb().expect("first run with no current task");
    gdt::set_kernel_stack(pcb.kernel_stack_vaddr_top);
    let frame = first_run_frame(pcb.entry_point(), pcb.user_stack_top());
    unsafe { enter_user_mode(&frame) }
}

/// Prime a forked child's kernel stack to land in
/// [`fork_child_trampoline`] on its first switch-to, the same technique
/// [`prepare_first_run`] uses for an `exec`-loaded process.
pub fn prepare_fork_child(kernel_stack_top: VirtAddr) -> u32 {
    let mut addr = kernel_stack_top;
    unsafe {
        addr -= 4;
        (addr as *mut u32).write(fork_child_trampoline as usize as u32);
        for _ in 0..4 {
            addr -= 4;
            (addr as *mut u32).write(0);
        }
    }
    addr
}

/// Where a freshly forked child's first switch-to lands: fetch the resume
/// frame its parent's syscall trap left in its PCB and restore straight
/// into it, with no ordinary `iretd` by entry-point/stack-top: the child
/// resumes as if `fork` had just returned, with eax = 0.
extern "C" fn fork_child_trampoline() -> ! {
    let pcb = crate::sched::scheduler::current_pcb().expect("fork resume with no current task");
    gdt::set_kernel_stack(pcb.kernel_stack_vaddr_top);
    let frame = pcb
        .resume_frame
        .lock()
        .take()
        .expect("fork child PCB missing its resume frame");
    unsafe { resume_from_frame(&frame) }
}

/// Restore every general-purpose register from `frame` and `iretd` back
/// into user mode at exactly the point it describes. Mirrors
/// `idt::isr_common`'s `popa; iretd` tail byte-for-byte, since `frame`'s
/// layout is that same trap frame (copied out of a parent's kernel stack
/// rather than the child's own).
///
/// # Safety
/// Must run on the target task's own kernel stack; `frame` must be a
/// validly captured trap frame with a ring-3 `cs`/`ss`.
unsafe fn resume_from_frame(frame: &IsrFrame) -> ! {
    unsafe { resume_from_frame_asm(frame as *const IsrFrame) }
}

#[unsafe(naked)]
unsafe extern "C" fn resume_from_frame_asm(_frame: *const IsrFrame) -> ! {
    naked_asm!(
        "mov eax, [esp+4]",        // eax = frame ptr (cdecl arg)
        "mov edi, [eax+0]",
        "mov esi, [eax+4]",
        "mov ebp, [eax+8]",
        "mov ebx, [eax+16]",
        "mov edx, [eax+20]",
        "mov ecx, [eax+24]",
        "push dword ptr [eax+56]", // user_ss
        "push dword ptr [eax+52]", // user_esp
        "push dword ptr [eax+48]", // eflags
        "push dword ptr [eax+44]", // cs
        "push dword ptr [eax+40]", // eip
        "mov eax, [eax+28]",       // eax = frame.eax last, now done using it as the pointer
        "iretd",
    )
}

/// `execve` on the process that's *currently* trapped in the
/// kernel servicing the syscall: there's no other task to switch to, so
/// instead of building a fresh kernel-stack trampoline the way
/// [`prepare_first_run`]/[`prepare_fork_child`] do for a task that hasn't
/// run yet, this rewrites the trap frame already sitting on this task's
/// own kernel stack. `isr_common`'s ordinary `popa; iretd` tail then lands
/// it in the new image exactly as if it had just been loaded fresh -
/// general-purpose registers zeroed, entry point and stack from the new
/// image, ring-3 selectors and interrupts enabled.
pub fn redirect_frame_to_new_image(frame: &mut IsrFrame, entry_point: VirtAddr, user_stack_top: VirtAddr) {
    frame.edi = 0;
    frame.esi = 0;
    frame.ebp = 0;
    frame.ebx = 0;
    frame.edx = 0;
    frame.ecx = 0;
    frame.eax = 0;
    frame.eip = entry_point;
    frame.cs = USER_CODE_SELECTOR as u32;
    frame.eflags = EFLAGS_RESERVED_BIT1 | EFLAGS_IF;
    frame.user_esp = user_stack_top;
    frame.user_ss = USER_DATA_SELECTOR as u32;
}

/// #GP handler (vector 13). A user-mode #GP kills the offending process —
/// the same policy as a fault outside any VMA or a hardware protection
/// check — while a kernel-mode #GP is an unrecoverable bug.
pub fn general_protection_fault(frame: &mut IsrFrame) {
    let from_user = frame.cs as u16 & 0x3 != 0;
    if from_user {
        let pid = crate::sched::scheduler::current_pid();
        log::warn!(
            "general protection fault in pid {:?} at eip={:#010x}, error_code={:#x}",
            pid,
            { frame.eip },
            { frame.error_code }
        );
        crate::process::lifecycle::kill_current(ExitReason::GeneralProtectionFault);
    } else {
        panic!(
            "general protection fault in kernel mode at eip={:#010x}, error_code={:#x}",
            { frame.eip },
            { frame.error_code }
        );
    }
}
