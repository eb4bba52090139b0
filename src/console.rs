//! Console vnode glue: what `read`/`write` dispatch to for fd 0 (line
//! discipline) and fds 1/2 (VGA + serial).

use crate::error::Errno;

/// fd 0's read path: block for a line, copy up to `buf.len()` bytes of it
/// (no NUL terminator added here — that's `terminal_read_line_blocking`'s
/// own contract for C-string callers, not this raw-bytes one).
pub fn read_line(buf: &mut [u8]) -> Result<usize, Errno> {
    if buf.is_empty() {
        return Ok(0);
    }
    let mut line_buf = alloc::vec![0u8; buf.len() + 1];
    let n = crate::terminal::terminal_read_line_blocking(&mut line_buf)?;
    buf[..n].copy_from_slice(&line_buf[..n]);
    Ok(n)
}

/// fds 1/2's write path: emit unchanged to VGA and serial.
pub fn write_bytes(bytes: &[u8]) -> Result<usize, Errno> {
    crate::print::console_write_bytes(bytes);
    Ok(bytes.len())
}

/// The console vnode has no file position; `lseek` always fails.
pub fn lseek() -> Result<u64, Errno> {
    Err(Errno::ESPIPE)
}
