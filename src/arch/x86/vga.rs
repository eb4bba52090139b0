//! VGA text-mode framebuffer at `0xB8000`, 80x25 cells.
//!
//! Cell rendering (the byte-pair-per-character layout) is the only part of
//! VGA text mode this kernel owns; font glyphs and the hardware cursor are
//! left at whatever BIOS/GRUB set them to.

use core::fmt;

use spin::Mutex;

const VGA_WIDTH: usize = 80;
const VGA_HEIGHT: usize = 25;
const VGA_BUFFER_VIRT: usize = 0xC00B_8000; // identity-mapped low 4MiB + KERNEL_VIRT_BASE

#[repr(transparent)]
#[derive(Clone, Copy)]
struct Cell(u16);

impl Cell {
    fn new(byte: u8, color: u8) -> Self {
        Self((color as u16) << 8 | byte as u16)
    }
}

pub struct VgaTerminal {
    col: usize,
    row: usize,
    color: u8,
}

const DEFAULT_COLOR: u8 = 0x07; // light grey on black
const WARN_COLOR: u8 = 0x0E; // yellow on black

impl VgaTerminal {
    const fn new() -> Self {
        Self {
            col: 0,
            row: 0,
            color: DEFAULT_COLOR,
        }
    }

    fn buffer(&mut self) -> &mut [Cell; VGA_WIDTH * VGA_HEIGHT] {
        // SAFETY: the low 4 MiB identity mapping is aliased at
        // KERNEL_VIRT_BASE by the boot trampoline, so this address is
        // always mapped once paging is live, for the life of the kernel.
        unsafe { &mut *(VGA_BUFFER_VIRT as *mut [Cell; VGA_WIDTH * VGA_HEIGHT]) }
    }

    fn put_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            0x08 => self.backspace(),
            byte => {
                if self.col >= VGA_WIDTH {
                    self.newline();
                }
                let (row, col, color) = (self.row, self.col, self.color);
                self.buffer()[row * VGA_WIDTH + col] = Cell::new(byte, color);
                self.col += 1;
            }
        }
    }

    fn backspace(&mut self) {
        if self.col > 0 {
            self.col -= 1;
            let (row, col) = (self.row, self.col);
            self.buffer()[row * VGA_WIDTH + col] = Cell::new(b' ', self.color);
        }
    }

    fn newline(&mut self) {
        self.col = 0;
        if self.row + 1 < VGA_HEIGHT {
            self.row += 1;
        } else {
            self.scroll();
        }
    }

    fn scroll(&mut self) {
        for row in 1..VGA_HEIGHT {
            for col in 0..VGA_WIDTH {
                let cell = self.buffer()[row * VGA_WIDTH + col];
                self.buffer()[(row - 1) * VGA_WIDTH + col] = cell;
            }
        }
        let blank = Cell::new(b' ', self.color);
        for col in 0..VGA_WIDTH {
            self.buffer()[(VGA_HEIGHT - 1) * VGA_WIDTH + col] = blank;
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.put_byte(b);
        }
    }

    pub fn set_color(&mut self, warn: bool) {
        self.color = if warn { WARN_COLOR } else { DEFAULT_COLOR };
    }
}

impl fmt::Write for VgaTerminal {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

static VGA: Mutex<VgaTerminal> = Mutex::new(VgaTerminal::new());

/// Writes to fds 1/2 land here unchanged.
pub fn write_bytes(bytes: &[u8]) {
    crate::arch::hal::without_interrupts(|| {
        VGA.lock().write_bytes(bytes);
    });
}

pub fn write_fmt(args: fmt::Arguments, warn: bool) {
    use fmt::Write;
    crate::arch::hal::without_interrupts(|| {
        let mut vga = VGA.lock();
        vga.set_color(warn);
        vga.write_fmt(args).ok();
        vga.set_color(false);
    });
}
