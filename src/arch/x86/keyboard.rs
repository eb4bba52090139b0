//! PS/2 keyboard IRQ glue.
//!
//! Scancode-to-`KeyEvent` decoding and keymap tables are external
//! collaborators; this module only reads the scancode byte off the
//! controller and forwards it to whatever [`ScancodeDecoder`] is
//! installed, then feeds the resulting key events to the terminal line
//! discipline.

use super::port::inb;

const KEYBOARD_DATA_PORT: u16 = 0x60;

/// A decoded keystroke, the narrow type the line discipline consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Printable(u8),
    Enter,
    Backspace,
    Other,
}

/// The external scancode-decoding contract: turns raw scancode bytes
/// into [`KeyEvent`]s using a keymap the core does not own.
pub trait ScancodeDecoder: Sync {
    fn decode(&self, scancode: u8) -> Option<KeyEvent>;
}

struct UsQwertyStub;

// Minimal built-in decoder good enough to drive the line discipline in the
// absence of a real keymap module: lowercase letters, enter and backspace.
impl ScancodeDecoder for UsQwertyStub {
    fn decode(&self, scancode: u8) -> Option<KeyEvent> {
        if scancode & 0x80 != 0 {
            return None; // key-release, ignored
        }
        const ROW1: &[u8] = b"qwertyuiop";
        const ROW2: &[u8] = b"asdfghjkl";
        const ROW3: &[u8] = b"zxcvbnm";
        match scancode {
            0x1C => Some(KeyEvent::Enter),
            0x0E => Some(KeyEvent::Backspace),
            0x39 => Some(KeyEvent::Printable(b' ')),
            0x10..=0x19 => Some(KeyEvent::Printable(ROW1[(scancode - 0x10) as usize])),
            0x1E..=0x26 => Some(KeyEvent::Printable(ROW2[(scancode - 0x1E) as usize])),
            0x2C..=0x32 => Some(KeyEvent::Printable(ROW3[(scancode - 0x2C) as usize])),
            _ => Some(KeyEvent::Other),
        }
    }
}

static DECODER: UsQwertyStub = UsQwertyStub;

/// Invoked from the IDT's IRQ1 dispatch — the keyboard IRQ handler.
pub fn on_irq1() {
    let scancode = unsafe { inb(KEYBOARD_DATA_PORT) };
    if let Some(event) = DECODER.decode(scancode) {
        crate::terminal::on_key_event(event);
    }
}
