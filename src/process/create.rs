//! Process creation: load an ELF32 executable from the VFS into a
//! freshly built address space and prime it for its first run.

use alloc::sync::Arc;

use crate::arch::x86::boot::KERNEL_VIRT_BASE;
use crate::arch::x86::idt::IsrFrame;
use crate::arch::x86::usermode;
use crate::elf::{ElfImage, PF_W, PF_X};
use crate::error::ProcessError;
use crate::mm::paging::{self, PageFlags};
use crate::mm::vma::{MmStruct, Vma, VmaFlags};
use crate::mm::{align_down, align_up, frame_allocator, VirtAddr, PAGE_SIZE};
use crate::vfs;

use super::fd::FdTable;
use super::kstack::KernelStack;
use super::pcb::{Pcb, Pid};

/// Top of the user stack VMA; one page short of the kernel/user split so
/// a wild access past the stack immediately faults into kernel territory
/// rather than silently landing on a mapped page.
const USER_STACK_TOP: VirtAddr = KERNEL_VIRT_BASE as VirtAddr - PAGE_SIZE as VirtAddr;
const USER_STACK_INITIAL_SIZE: VirtAddr = PAGE_SIZE as VirtAddr;
const USER_HEAP_SIZE: VirtAddr = 16 * PAGE_SIZE as VirtAddr;

fn segment_vma_flags(elf_flags: u32) -> VmaFlags {
    let mut flags = VmaFlags::READ | VmaFlags::USER;
    if elf_flags & PF_W != 0 {
        flags |= VmaFlags::WRITE;
    }
    if elf_flags & PF_X != 0 {
        flags |= VmaFlags::EXEC;
    }
    flags
}

/// Map and populate one `PT_LOAD` segment, page by page, copying its file
/// bytes and zero-filling the rest of `mem_size`. Loaded eagerly rather
/// than demand-paged: the loader is the one place that still has the
/// file bytes in hand.
fn load_segment(pd_phys: u32, image: &ElfImage, segment: &crate::elf::ProgramSegment) -> Result<(), ProcessError> {
    let file_bytes = image.segment_bytes(segment)?;
    let start = align_down(segment.vaddr, PAGE_SIZE as u32);
    let end = align_up(segment.vaddr + segment.mem_size, PAGE_SIZE as u32);
    let vma_flags = segment_vma_flags(segment.flags);
    let page_flags = {
        let mut f = PageFlags::PRESENT | PageFlags::USER;
        if vma_flags.contains(VmaFlags::WRITE) {
            f |= PageFlags::WRITABLE;
        }
        f
    };

    let mut page = start;
    while page < end {
        let frame = frame_allocator::frame_alloc().ok_or(ProcessError::ExecFailed)?;
        paging::with_temp_map(frame, |dst| unsafe {
            core::ptr::write_bytes(dst, 0, PAGE_SIZE);
            let page_start = page as i64;
            let page_end = page_start + PAGE_SIZE as i64;
            let file_start = segment.vaddr as i64;
            let file_end = file_start + segment.file_size as i64;
            let overlap_start = page_start.max(file_start);
            let overlap_end = page_end.min(file_end);
            if overlap_end > overlap_start {
                let src_off = (overlap_start - file_start) as usize;
                let dst_off = (overlap_start - page_start) as usize;
                let len = (overlap_end - overlap_start) as usize;
                core::ptr::copy_nonoverlapping(file_bytes[src_off..src_off + len].as_ptr(), dst.add(dst_off), len);
            }
        });
        // Write-protect is applied after the copy: the frame was mapped
        // writable into the temp slot regardless of the segment's own
        // permissions.
        paging::map_page(pd_phys, page, frame, page_flags).map_err(|_| ProcessError::ExecFailed)?;
        page += PAGE_SIZE as u32;
    }
    Ok(())
}

/// A freshly built, not-yet-attached-to-any-PCB address space, shared by
/// [`create_user_process`] (a brand-new PCB) and [`execve_current`]
/// (replacing a live one's address space).
struct ProcessImage {
    pd_phys: u32,
    mm: Arc<MmStruct>,
    entry_point: VirtAddr,
    user_stack_top: VirtAddr,
}

/// Build a fresh address space from the ELF file at `path`: a new page
/// directory, every `PT_LOAD` segment mapped and populated, heap and
/// user-stack VMAs, and the top stack page eagerly mapped. Touches
/// nothing but its own freshly allocated frames and page directory -
/// nothing about the caller's current process is read or modified, so a
/// failure here leaves the caller's own image untouched: on failure the
/// calling process is unaffected.
fn build_process_image(path: &str) -> Result<ProcessImage, ProcessError> {
    // 1-2: fresh address space.
    let pd_phys = paging::clone_kernel_space().map_err(|_| ProcessError::ExecFailed)?;

    // 4: mm_struct.
    let mm = Arc::new(MmStruct::new(pd_phys));

    // 5: load the executable.
    let bytes = vfs::read_whole_file(path).map_err(|_| ProcessError::ExecFailed)?;
    let image = ElfImage::parse(&bytes)?;
    let mut highest_end: VirtAddr = 0;
    for segment in image.segments() {
        let segment = segment?;
        load_segment(pd_phys, &image, &segment)?;
        mm.insert_vma(Vma {
            start: align_down(segment.vaddr, PAGE_SIZE as u32),
            end: align_up(segment.vaddr + segment.mem_size, PAGE_SIZE as u32),
            flags: segment_vma_flags(segment.flags),
            file: None,
        })
        .map_err(|_| ProcessError::ExecFailed)?;
        highest_end = highest_end.max(align_up(segment.vaddr + segment.mem_size, PAGE_SIZE as u32));
    }

    // 6: heap and user-stack VMAs.
    let heap_start = align_up(highest_end.max(0x1000), PAGE_SIZE as u32);
    mm.insert_vma(Vma {
        start: heap_start,
        end: heap_start + USER_HEAP_SIZE,
        flags: VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER | VmaFlags::ANONYMOUS,
        file: None,
    })
    .map_err(|_| ProcessError::ExecFailed)?;

    let stack_vma_start = USER_STACK_TOP - USER_STACK_INITIAL_SIZE;
    mm.insert_vma(Vma {
        start: stack_vma_start,
        end: USER_STACK_TOP,
        flags: VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER | VmaFlags::GROWS_DOWN | VmaFlags::ANONYMOUS,
        file: None,
    })
    .map_err(|_| ProcessError::ExecFailed)?;

    // 7: eagerly map the top stack page so the first push never faults.
    let stack_frame = frame_allocator::frame_alloc().ok_or(ProcessError::ExecFailed)?;
    paging::with_temp_map(stack_frame, |ptr| unsafe {
        core::ptr::write_bytes(ptr, 0, PAGE_SIZE);
    });
    paging::map_page(
        pd_phys,
        stack_vma_start,
        stack_frame,
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
    )
    .map_err(|_| ProcessError::ExecFailed)?;

    let user_stack_top = USER_STACK_TOP - 16; // leave a little slack below the top guard page

    // 8: verify entry point and stack top are actually mapped.
    if paging::walk(pd_phys, align_down(image.entry_point, PAGE_SIZE as u32)).is_none() {
        return Err(ProcessError::ExecFailed);
    }
    if paging::walk(pd_phys, align_down(user_stack_top, PAGE_SIZE as u32)).is_none() {
        return Err(ProcessError::ExecFailed);
    }

    Ok(ProcessImage {
        pd_phys,
        mm,
        entry_point: image.entry_point,
        user_stack_top,
    })
}

/// Load `path` as a new process with parent `ppid`, scheduled at
/// `priority`. Runs the full creation sequence end to end.
pub fn create_user_process(path: &str, ppid: Pid, priority: u8) -> Result<Pid, ProcessError> {
    let pid = super::allocate_pid();

    // 3: kernel stack with guard page.
    let kernel_stack = KernelStack::alloc().map_err(|_| ProcessError::ExecFailed)?;

    let image = build_process_image(path)?;

    let pcb = Pcb::new(
        pid,
        ppid,
        image.mm,
        kernel_stack,
        image.user_stack_top,
        image.entry_point,
        FdTable::with_stdio(),
    );

    // 9: prime the first-run context.
    let primed_esp = usermode::prepare_first_run(pcb.kernel_stack_vaddr_top);
    pcb.kernel_esp_for_switch.store(primed_esp, core::sync::atomic::Ordering::SeqCst);

    super::register(pcb.clone());
    if let Some(parent) = super::lookup(ppid) {
        parent.children.lock().push(pid);
    }
    crate::sched::scheduler::create_and_enqueue_task(pcb, priority);
    Ok(pid)
}

/// `execve`: replace the calling process's entire address space
/// with a freshly loaded image from `path`, keeping its PID, PCB, kernel
/// stack, open files and process-group linkage intact. The new image is
/// built completely before anything about the caller is touched, so a
/// load failure leaves the caller running exactly as before.
///
/// Returns the new entry point and stack top; the caller (`sys_execve`)
/// is responsible for redirecting its own in-flight syscall trap frame
/// there; this function does not touch any `IsrFrame`.
pub fn execve_current(path: &str) -> Result<(VirtAddr, VirtAddr), ProcessError> {
    let pcb = crate::sched::scheduler::current_pcb().ok_or(ProcessError::NoSuchProcess)?;

    let image = build_process_image(path)?;

    let old_pd_phys = pcb.pd_phys();
    let new_pd_phys = image.pd_phys;
    pcb.set_mm(image.mm);
    pcb.set_entry_point(image.entry_point);
    pcb.set_user_stack_top(image.user_stack_top);

    // Switch live onto the new page directory before tearing down the old
    // one - the old one must stay mapped in CR3 until the new one is,
    // since this code is running on it right now.
    crate::sched::scheduler::set_current_address_space(new_pd_phys);
    paging::destroy_user_space(old_pd_phys);
    frame_allocator::put_frame(old_pd_phys);

    Ok((image.entry_point, image.user_stack_top))
}

/// `fork`: duplicate the calling process's address space (eager copy,
/// not copy-on-write) and FD table, and arrange for the child's first
/// run to resume exactly where the parent's syscall trapped in, with
/// `eax` forced to 0.
pub fn fork(parent_frame: &IsrFrame) -> Result<Pid, ProcessError> {
    let parent_pcb = crate::sched::scheduler::current_pcb().ok_or(ProcessError::NoSuchProcess)?;
    let ppid = parent_pcb.pid;
    let pid = super::allocate_pid();

    let pd_phys = paging::clone_kernel_space().map_err(|_| ProcessError::ExecFailed)?;
    let kernel_stack = KernelStack::alloc().map_err(|_| ProcessError::ExecFailed)?;
    let mm = Arc::new(MmStruct::new(pd_phys));

    let parent_mm = parent_pcb.mm();
    for vma in parent_mm.vmas_snapshot() {
        mm.insert_vma(vma).map_err(|_| ProcessError::ExecFailed)?;
        let mut page = vma.start;
        while page < vma.end {
            if let Some((parent_phys, parent_flags)) = paging::walk(parent_mm.pd_phys, page) {
                let child_phys = frame_allocator::frame_alloc().ok_or(ProcessError::ExecFailed)?;
                paging::copy_frame(parent_phys, child_phys);
                paging::map_page(pd_phys, page, child_phys, parent_flags).map_err(|_| ProcessError::ExecFailed)?;
            }
            page += PAGE_SIZE as u32;
        }
    }

    let fd_table = parent_pcb.fd_table.lock().clone_table();

    let pcb = Pcb::new(
        pid,
        ppid,
        mm,
        kernel_stack,
        parent_pcb.user_stack_top(),
        parent_pcb.entry_point(),
        fd_table,
    );

    *pcb.cwd.lock() = parent_pcb.cwd.lock().clone();

    let mut child_frame = *parent_frame;
    child_frame.eax = 0;
    *pcb.resume_frame.lock() = Some(child_frame);

    let primed_esp = usermode::prepare_fork_child(pcb.kernel_stack_vaddr_top);
    pcb.kernel_esp_for_switch.store(primed_esp, core::sync::atomic::Ordering::SeqCst);

    super::register(pcb.clone());
    parent_pcb.children.lock().push(pid);

    let priority = crate::sched::scheduler::current_tcb().map(|t| t.base_priority).unwrap_or(1);
    crate::sched::scheduler::create_and_enqueue_task(pcb, priority);
    Ok(pid)
}
