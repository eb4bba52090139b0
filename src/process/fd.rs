//! File-descriptor table.

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{Errno, ProcessError};

pub const MAX_FDS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
    Console,
    Pipe,
    File,
}

/// An open-file object: a vnode reference plus the cursor and access mode
/// that belong to *this* open, not to the vnode itself. `dup2` and `fork`
/// share one of these between two slots; the offset then mutates for
/// both.
pub struct OpenFile {
    pub kind: VnodeKind,
    pub offset: Mutex<u64>,
    pub readable: bool,
    pub writable: bool,
    /// Present for `VnodeKind::Pipe`; the pipe's identity.
    pub pipe: Option<Arc<crate::pipe::Pipe>>,
    /// Present for `VnodeKind::File`; the VFS inode number and the driver
    /// that resolved it, so a later `read`/`write`/`lseek` doesn't need to
    /// re-walk the mount table by path.
    pub inode: Option<u64>,
    pub driver: Option<Arc<dyn crate::vfs::VfsDriver>>,
}

impl OpenFile {
    pub fn console(readable: bool, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            kind: VnodeKind::Console,
            offset: Mutex::new(0),
            readable,
            writable,
            pipe: None,
            inode: None,
            driver: None,
        })
    }

    pub fn pipe_end(pipe: Arc<crate::pipe::Pipe>, readable: bool, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            kind: VnodeKind::Pipe,
            offset: Mutex::new(0),
            readable,
            writable,
            pipe: Some(pipe),
            inode: None,
            driver: None,
        })
    }

    pub fn file(driver: Arc<dyn crate::vfs::VfsDriver>, inode: u64, readable: bool, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            kind: VnodeKind::File,
            offset: Mutex::new(0),
            readable,
            writable,
            pipe: None,
            inode: Some(inode),
            driver: Some(driver),
        })
    }
}

/// The real close happens here, when the last `Arc<OpenFile>` drops -
/// which, thanks to `dup2`/`fork` sharing one `OpenFile` across several FD
/// slots, may be long after any one slot's own `close` syscall returns.
impl Drop for OpenFile {
    fn drop(&mut self) {
        match self.kind {
            VnodeKind::File => {
                if let (Some(driver), Some(inode)) = (&self.driver, self.inode) {
                    driver.close(inode).ok();
                }
            }
            VnodeKind::Pipe => {
                if let Some(pipe) = &self.pipe {
                    if self.readable {
                        pipe.drop_reader();
                    }
                    if self.writable {
                        pipe.drop_writer();
                    }
                }
            }
            VnodeKind::Console => {}
        }
    }
}

/// Fixed-size table of `Option<Arc<OpenFile>>`, one lock per process.
pub struct FdTable {
    slots: [Option<Arc<OpenFile>>; MAX_FDS],
}

impl FdTable {
    pub const fn empty() -> Self {
        const NONE: Option<Arc<OpenFile>> = None;
        Self { slots: [NONE; MAX_FDS] }
    }

    /// Standard fds 0/1/2: console read/write respectively.
    pub fn with_stdio() -> Self {
        let mut table = Self::empty();
        table.slots[0] = Some(OpenFile::console(true, false));
        table.slots[1] = Some(OpenFile::console(false, true));
        table.slots[2] = Some(OpenFile::console(false, true));
        table
    }

    pub fn get(&self, fd: i32) -> Result<Arc<OpenFile>, Errno> {
        let idx = Self::index(fd)?;
        self.slots[idx].clone().ok_or(Errno::EBADF)
    }

    /// Install `file` in the lowest-numbered free slot.
    pub fn install(&mut self, file: Arc<OpenFile>) -> Result<i32, ProcessError> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(idx as i32);
            }
        }
        Err(ProcessError::FdTableFull)
    }

    pub fn close(&mut self, fd: i32) -> Result<(), Errno> {
        let idx = Self::index(fd)?;
        if self.slots[idx].take().is_none() {
            return Err(Errno::EBADF);
        }
        Ok(())
    }

    /// `dup2`: equal fds are a no-op success; otherwise close `new`
    /// first (if open) and point it at `old`'s object.
    pub fn dup2(&mut self, old: i32, new: i32) -> Result<i32, Errno> {
        let old_idx = Self::index(old)?;
        let new_idx = Self::index(new)?;
        if old == new {
            if self.slots[old_idx].is_none() {
                return Err(Errno::EBADF);
            }
            return Ok(new);
        }
        let file = self.slots[old_idx].clone().ok_or(Errno::EBADF)?;
        self.slots[new_idx] = Some(file);
        Ok(new)
    }

    fn index(fd: i32) -> Result<usize, Errno> {
        if fd < 0 || fd as usize >= MAX_FDS {
            return Err(Errno::EBADF);
        }
        Ok(fd as usize)
    }

    /// Used by `fork`: every occupied slot is duplicated into a fresh
    /// table pointing at the *same* open-file objects.
    pub fn clone_table(&self) -> Self {
        let mut table = Self::empty();
        for (idx, slot) in self.slots.iter().enumerate() {
            table.slots[idx] = slot.clone();
        }
        table
    }

    pub fn close_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_slots_are_preinstalled() {
        let table = FdTable::with_stdio();
        assert!(table.get(0).is_ok());
        assert!(table.get(1).is_ok());
        assert!(table.get(3).is_err());
    }

    #[test]
    fn close_then_close_again_is_ebadf() {
        let mut table = FdTable::with_stdio();
        assert!(table.close(0).is_ok());
        assert_eq!(table.close(0), Err(Errno::EBADF));
    }

    #[test]
    fn dup2_shares_the_open_file() {
        let mut table = FdTable::with_stdio();
        assert_eq!(table.dup2(1, 5), Ok(5));
        assert!(table.close(1).is_ok());
        assert!(table.get(5).is_ok());
    }

    #[test]
    fn dup2_same_fd_is_a_no_op() {
        let mut table = FdTable::with_stdio();
        assert_eq!(table.dup2(1, 1), Ok(1));
    }

    #[test]
    fn install_fails_when_table_is_full() {
        let mut table = FdTable::empty();
        for _ in 0..MAX_FDS {
            table.install(OpenFile::console(true, false)).unwrap();
        }
        assert_eq!(
            table.install(OpenFile::console(true, false)).unwrap_err(),
            ProcessError::FdTableFull
        );
    }
}
