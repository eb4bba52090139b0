//! 8253/8254 PIT, programmed to fire IRQ0 at the configured tick rate
//! (`BootConfig::tick_hz`). External to the core in the sense that the
//! hardware divisor math is a fixed recipe; the tick rate it is fed is a
//! core decision.

use core::sync::atomic::{AtomicU64, Ordering};

use super::port::outb;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_BASE_FREQUENCY: u32 = 1_193_182;

static UPTIME_TICKS: AtomicU64 = AtomicU64::new(0);

/// # Safety
/// Must run once, early, before interrupts are unmasked.
pub unsafe fn init(tick_hz: u32) {
    let divisor = (PIT_BASE_FREQUENCY / tick_hz.max(19)).min(u16::MAX as u32) as u16;
    outb(PIT_COMMAND, 0x36); // channel 0, lobyte/hibyte, mode 3 (square wave)
    outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
    outb(PIT_CHANNEL0, (divisor >> 8) as u8);
}

/// Called once per timer IRQ, before the scheduler's tick handler runs.
pub fn on_tick() -> u64 {
    UPTIME_TICKS.fetch_add(1, Ordering::Relaxed) + 1
}

pub fn uptime_ticks() -> u64 {
    UPTIME_TICKS.load(Ordering::Relaxed)
}
