//! In-kernel pipe (C10): a bounded byte ring buffer with two
//! reference-counted ends. Recognisable to the VFS glue by its fd
//! carrying a [`Pipe`] rather than a driver/inode pair.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::error::Errno;
use crate::process::pcb::Pid;

const PIPE_CAPACITY: usize = 4096;

struct PipeBuffer {
    data: VecDeque<u8>,
    readers: u32,
    writers: u32,
    waiters: Vec<Pid>,
}

pub struct Pipe {
    buffer: Mutex<PipeBuffer>,
    id: u32,
}

static NEXT_PIPE_ID: AtomicU32 = AtomicU32::new(1);

impl Pipe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(PipeBuffer {
                data: VecDeque::with_capacity(PIPE_CAPACITY),
                readers: 1,
                writers: 1,
                waiters: Vec::new(),
            }),
            id: NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn add_reader(&self) {
        self.buffer.lock().readers += 1;
    }

    pub fn add_writer(&self) {
        self.buffer.lock().writers += 1;
    }

    /// Drop a reference to the read end; when the last reader goes,
    /// pending/future writers see `EPIPE` (we model this passively: any
    /// writer entering `write` after this observes `readers == 0`).
    pub fn drop_reader(&self) {
        let mut buf = self.buffer.lock();
        buf.readers = buf.readers.saturating_sub(1);
    }

    pub fn drop_writer(&self) {
        let mut buf = self.buffer.lock();
        buf.writers = buf.writers.saturating_sub(1);
    }

    /// Copy up to `out.len()` bytes out of the pipe. Blocks (via the
    /// scheduler) while empty and at least one writer remains; returns
    /// `Ok(0)` once the last writer has gone (EOF).
    pub fn read(&self, out: &mut [u8]) -> Result<usize, Errno> {
        loop {
            {
                let mut buf = self.buffer.lock();
                if !buf.data.is_empty() {
                    let n = out.len().min(buf.data.len());
                    for slot in out.iter_mut().take(n) {
                        *slot = buf.data.pop_front().unwrap();
                    }
                    return Ok(n);
                }
                if buf.writers == 0 {
                    return Ok(0);
                }
                buf.waiters.push(crate::sched::scheduler::current_pid());
            }
            crate::sched::scheduler::block_current_on_pipe(self.id);
        }
    }

    /// Copy `input` into the pipe, waking any blocked reader. Fails with
    /// `EPIPE` once the last reader has gone.
    pub fn write(&self, input: &[u8]) -> Result<usize, Errno> {
        let mut buf = self.buffer.lock();
        if buf.readers == 0 {
            return Err(Errno::EPIPE);
        }
        let n = input.len().min(PIPE_CAPACITY.saturating_sub(buf.data.len()));
        for &byte in &input[..n] {
            buf.data.push_back(byte);
        }
        let waiters = core::mem::take(&mut buf.waiters);
        drop(buf);
        for pid in waiters {
            crate::sched::scheduler::scheduler_unblock_task(pid);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let pipe_buf = Mutex::new(PipeBuffer {
            data: VecDeque::new(),
            readers: 1,
            writers: 1,
            waiters: Vec::new(),
        });
        let pipe = Pipe {
            buffer: pipe_buf,
            id: 1,
        };
        assert_eq!(pipe.write(b"hello").unwrap(), 5);
        let mut out = [0u8; 5];
        {
            let mut buf = pipe.buffer.lock();
            let n = out.len().min(buf.data.len());
            for slot in out.iter_mut().take(n) {
                *slot = buf.data.pop_front().unwrap();
            }
        }
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn write_with_no_readers_is_epipe() {
        let pipe_buf = Mutex::new(PipeBuffer {
            data: VecDeque::new(),
            readers: 0,
            writers: 1,
            waiters: Vec::new(),
        });
        let pipe = Pipe {
            buffer: pipe_buf,
            id: 1,
        };
        assert_eq!(pipe.write(b"x"), Err(Errno::EPIPE));
    }

    #[test]
    fn read_with_no_writers_and_empty_buffer_is_eof() {
        let pipe_buf = Mutex::new(PipeBuffer {
            data: VecDeque::new(),
            readers: 1,
            writers: 0,
            waiters: Vec::new(),
        });
        let pipe = Pipe {
            buffer: pipe_buf,
            id: 1,
        };
        let mut out = [0u8; 4];
        assert_eq!(pipe.read(&mut out).unwrap(), 0);
    }
}
