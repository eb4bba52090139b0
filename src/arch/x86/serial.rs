//! 16550 UART on COM1, polled (no interrupt-driven TX).
//!
//! Hand-rolled against the raw register layout rather than pulled in from
//! a crate: the usual `uart_16550` wrapper is implemented in terms of the
//! `x86_64` crate and doesn't target i686.

use core::fmt;

use spin::Mutex;

use super::port::{inb, outb};

const COM1: u16 = 0x3F8;

struct SerialPort {
    base: u16,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self { base }
    }

    fn init(&self) {
        unsafe {
            outb(self.base + 1, 0x00); // disable interrupts
            outb(self.base + 3, 0x80); // enable DLAB
            outb(self.base, 0x03); // divisor low: 38400 baud
            outb(self.base + 1, 0x00); // divisor high
            outb(self.base + 3, 0x03); // 8 bits, no parity, one stop bit
            outb(self.base + 2, 0xC7); // enable + clear FIFO, 14-byte threshold
            outb(self.base + 4, 0x0B); // IRQs enabled, RTS/DSR set
        }
    }

    fn line_is_empty(&self) -> bool {
        unsafe { inb(self.base + 5) & 0x20 != 0 }
    }

    fn write_byte(&self, byte: u8) {
        while !self.line_is_empty() {
            core::hint::spin_loop();
        }
        unsafe { outb(self.base, byte) };
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

pub fn init() {
    SERIAL1.lock().init();
}

pub fn write_fmt(args: fmt::Arguments) {
    use fmt::Write;
    // Interrupts must stay masked across the write: the logger may be
    // invoked from inside an IRQ handler (e.g. a page-fault OOM report).
    without_interrupts(|| {
        SERIAL1.lock().write_fmt(args).ok();
    });
}

pub fn write_bytes(bytes: &[u8]) {
    without_interrupts(|| {
        let serial = SERIAL1.lock();
        for &b in bytes {
            serial.write_byte(b);
        }
    });
}

fn without_interrupts<F: FnOnce() -> R, R>(f: F) -> R {
    crate::arch::hal::without_interrupts(f)
}
