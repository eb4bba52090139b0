//! Terminal line discipline (C9): a single global input line, fed byte
//! by byte from the keyboard IRQ, with exactly one blocking reader at a
//! time.

use alloc::vec::Vec;

use spin::Mutex;

use crate::arch::x86::keyboard::KeyEvent;
use crate::error::Errno;
use crate::process::pcb::Pid;

const LINE_BUFFER_CAPACITY: usize = 256;

struct LineBuffer {
    data: Vec<u8>,
    ready: bool,
    waiter: Option<Pid>,
}

static LINE: Mutex<LineBuffer> = Mutex::new(LineBuffer {
    data: Vec::new(),
    ready: false,
    waiter: None,
});

fn echo(byte: u8) {
    crate::print::console_write_bytes(&[byte]);
}

fn echo_backspace() {
    crate::print::console_write_bytes(b"\x08 \x08");
}

/// Called from [`crate::arch::x86::keyboard::on_irq1`] for every decoded
/// keystroke.
pub fn on_key_event(event: KeyEvent) {
    let waiter = {
        let mut line = LINE.lock();
        match event {
            KeyEvent::Printable(byte) => {
                if line.data.len() < LINE_BUFFER_CAPACITY {
                    line.data.push(byte);
                    echo(byte);
                }
                None
            }
            KeyEvent::Backspace => {
                if line.data.pop().is_some() {
                    echo_backspace();
                }
                None
            }
            KeyEvent::Enter => {
                line.ready = true;
                echo(b'\n');
                line.waiter.take()
            }
            KeyEvent::Other => None,
        }
    };
    if let Some(pid) = waiter {
        crate::sched::scheduler::scheduler_unblock_task(pid);
    }
}

/// Block the calling task until a full line is available, then copy up
/// to `len - 1` bytes of it (NUL-terminated) into `buf` and clear the
/// buffer. Only one task may be the waiter at a time; a second
/// concurrent caller gets `EBUSY`.
pub fn terminal_read_line_blocking(buf: &mut [u8]) -> Result<usize, Errno> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        {
            let mut line = LINE.lock();
            if line.ready {
                let n = (buf.len() - 1).min(line.data.len());
                buf[..n].copy_from_slice(&line.data[..n]);
                buf[n] = 0;
                line.data.clear();
                line.ready = false;
                line.waiter = None;
                return Ok(n);
            }
            let me = crate::sched::scheduler::current_pid();
            match line.waiter {
                None => line.waiter = Some(me),
                Some(existing) if existing == me => {}
                Some(_) => return Err(Errno::EBUSY),
            }
        }
        crate::sched::scheduler::block_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_keys_accumulate_and_enter_marks_ready() {
        *LINE.lock() = LineBuffer {
            data: Vec::new(),
            ready: false,
            waiter: None,
        };
        on_key_event(KeyEvent::Printable(b'h'));
        on_key_event(KeyEvent::Printable(b'i'));
        assert!(!LINE.lock().ready);
        on_key_event(KeyEvent::Enter);
        let line = LINE.lock();
        assert!(line.ready);
        assert_eq!(&line.data, b"hi");
    }

    #[test]
    fn backspace_removes_last_byte() {
        *LINE.lock() = LineBuffer {
            data: alloc::vec![b'a', b'b'],
            ready: false,
            waiter: None,
        };
        on_key_event(KeyEvent::Backspace);
        assert_eq!(&LINE.lock().data, b"a");
    }

    #[test]
    fn buffer_full_drops_further_printable_bytes() {
        *LINE.lock() = LineBuffer {
            data: alloc::vec![0u8; LINE_BUFFER_CAPACITY],
            ready: false,
            waiter: None,
        };
        on_key_event(KeyEvent::Printable(b'x'));
        assert_eq!(LINE.lock().data.len(), LINE_BUFFER_CAPACITY);
    }
}
