//! Process teardown, run by the reaper. Only ever called on a task
//! already spliced out of every run queue and task table.

use crate::mm::{frame_allocator, paging};

/// Tear down `pid`'s address space, kernel stack and PCB: open files
/// first (closing drops any pipe/file references), then the address
/// space, then the kernel stack, then the PCB itself.
pub fn destroy_process(pid: super::pcb::Pid) {
    let Some(pcb) = super::unregister(pid) else {
        log::warn!("destroy_process: pid {pid} already gone");
        return;
    };

    pcb.fd_table.lock().close_all();

    let mm = pcb.mm();
    paging::destroy_user_space(mm.pd_phys);
    frame_allocator::put_frame(mm.pd_phys);

    if let Some(kernel_stack) = pcb.kernel_stack.lock().take() {
        kernel_stack.free();
    }

    log::debug!("destroy_process: pid {pid} fully reclaimed");
    // `pcb` (the last `Arc<Pcb>`) drops here, freeing the PCB allocation.
}
