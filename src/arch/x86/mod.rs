//! i686 architecture support: everything boot.rs hands off to before a
//! single line of the portable kernel runs.

pub mod boot;
pub mod context;
pub mod gdt;
pub mod idt;
pub mod keyboard;
pub mod pic;
pub mod pit;
pub mod port;
pub mod serial;
pub mod usermode;
pub mod vga;

/// Entry point called by the boot trampoline (`boot.rs`'s `global_asm!`)
/// once paging is live and the stack has moved to its virtual address.
///
/// # Safety
/// Must only ever be called once, by the boot trampoline itself.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn x86_boot_main(multiboot_magic: u32, multiboot_info: u32) -> ! {
    serial::init();
    crate::print::init();
    log::info!("coal kernel booting (multiboot magic {:#010x})", multiboot_magic);

    if multiboot_magic != boot::MULTIBOOT2_MAGIC {
        panic!("bad multiboot2 magic: {multiboot_magic:#010x}");
    }
    let boot_info = unsafe { crate::boot_info::BootInfo::from_multiboot2(multiboot_info) };
    crate::config::install(boot_info.command_line());
    let config = crate::config::boot_config();
    log::set_max_level(config.log_level);

    super::hal::init_platform(config.tick_hz);

    unsafe { crate::mm::init(&boot_info) };

    #[cfg(feature = "test-entry")]
    unsafe {
        crate::test_support::run_registered_test()
    }

    #[cfg(not(feature = "test-entry"))]
    {
        crate::process::init();
        crate::sched::scheduler::init();

        super::hal::enable_interrupts();

        crate::sched::scheduler::run_idle();
    }
}
