//! Narrow VFS interface: the core calls through this vtable for any fd
//! that isn't a pipe or the console. A single read-only in-memory
//! driver (the boot "initrd") is provided so `create_user_process` has
//! somewhere to load `/bin/init` from; a real FAT/ext-style driver is an
//! external collaborator that would register through the same trait.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::{Mutex, Once};

use crate::error::FsError;

/// The block-device contract: sector size 512, zero on success.
pub trait BlockDevice: Send + Sync {
    fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> i32;
    fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> i32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileStat {
    pub inode: u64,
    pub size: u64,
    pub is_directory: bool,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub inode: u64,
    pub is_directory: bool,
}

/// A filesystem driver's vtable. `open` returns an
/// opaque inode handle the core threads back through every other call.
pub trait VfsDriver: Send + Sync {
    fn mount(&self) -> Result<(), FsError> {
        Ok(())
    }
    fn unmount(&self) -> Result<(), FsError> {
        Ok(())
    }
    fn open(&self, path: &str) -> Result<u64, FsError>;
    fn read(&self, inode: u64, offset: u64, buf: &mut [u8]) -> Result<usize, FsError>;
    fn write(&self, inode: u64, offset: u64, buf: &[u8]) -> Result<usize, FsError>;
    fn close(&self, inode: u64) -> Result<(), FsError> {
        let _ = inode;
        Ok(())
    }
    fn lseek(&self, inode: u64) -> Result<u64, FsError> {
        let _ = inode;
        Err(FsError::IoError)
    }
    fn readdir(&self, dir_inode: u64) -> Result<Vec<DirEntry>, FsError>;
    fn unlink(&self, path: &str) -> Result<(), FsError>;
    fn mkdir(&self, path: &str) -> Result<(), FsError>;
    fn rmdir(&self, path: &str) -> Result<(), FsError>;
    fn stat(&self, inode: u64) -> Result<FileStat, FsError>;
}

struct MountPoint {
    prefix: &'static str,
    driver: Arc<dyn VfsDriver>,
}

static MOUNTS: Mutex<Vec<MountPoint>> = Mutex::new(Vec::new());

/// Register `driver` to serve every path under `prefix` (longest-prefix
/// match wins). Called once per filesystem at boot.
pub fn register_driver(prefix: &'static str, driver: Arc<dyn VfsDriver>) {
    driver.mount().ok();
    MOUNTS.lock().push(MountPoint { prefix, driver });
}

fn resolve(path: &str) -> Result<Arc<dyn VfsDriver>, FsError> {
    let mounts = MOUNTS.lock();
    mounts
        .iter()
        .filter(|m| path.starts_with(m.prefix))
        .max_by_key(|m| m.prefix.len())
        .map(|m| m.driver.clone())
        .ok_or(FsError::NotFound)
}

pub fn open(path: &str) -> Result<(Arc<dyn VfsDriver>, u64), FsError> {
    if path.len() > 4096 {
        return Err(FsError::NameTooLong);
    }
    let driver = resolve(path)?;
    let inode = driver.open(path)?;
    Ok((driver, inode))
}

pub fn stat(path: &str) -> Result<FileStat, FsError> {
    let driver = resolve(path)?;
    let inode = driver.open(path)?;
    driver.stat(inode)
}

pub fn readdir(path: &str) -> Result<Vec<DirEntry>, FsError> {
    let driver = resolve(path)?;
    let inode = driver.open(path)?;
    driver.readdir(inode)
}

pub fn mkdir(path: &str) -> Result<(), FsError> {
    resolve(path)?.mkdir(path)
}

pub fn rmdir(path: &str) -> Result<(), FsError> {
    resolve(path)?.rmdir(path)
}

pub fn unlink(path: &str) -> Result<(), FsError> {
    resolve(path)?.unlink(path)
}

/// Read an entire file into a freshly allocated buffer, used by C12 to
/// pull an executable's bytes off whatever filesystem serves its path.
pub fn read_whole_file(path: &str) -> Result<Vec<u8>, FsError> {
    let (driver, inode) = open(path)?;
    let stat = driver.stat(inode)?;
    let mut buf = alloc::vec![0u8; stat.size as usize];
    let mut offset = 0usize;
    while offset < buf.len() {
        let n = driver.read(inode, offset as u64, &mut buf[offset..])?;
        if n == 0 {
            break;
        }
        offset += n;
    }
    buf.truncate(offset);
    driver.close(inode).ok();
    Ok(buf)
}

struct InitrdEntry {
    name: &'static str,
    data: &'static [u8],
}

/// Read-only boot filesystem: a fixed table of `(path, bytes)` pairs
/// baked in at link time, just enough to get `/bin/init` off the ground
/// before any real block-device driver is registered.
pub struct Initrd {
    entries: Vec<InitrdEntry>,
}

static INITRD_FILES: Once<Vec<(&'static str, &'static [u8])>> = Once::new();

impl Initrd {
    pub fn new() -> Arc<Self> {
        let entries = INITRD_FILES
            .get()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|(name, data)| InitrdEntry { name, data })
            .collect();
        Arc::new(Self { entries })
    }

    fn find(&self, path: &str) -> Option<&InitrdEntry> {
        self.entries.iter().find(|e| e.name == path)
    }
}

/// Register the boot initrd's file table. Must run before
/// [`register_driver`] mounts an [`Initrd`] built from it.
pub fn set_initrd_files(files: Vec<(&'static str, &'static [u8])>) {
    INITRD_FILES.call_once(|| files);
}

impl VfsDriver for Initrd {
    fn open(&self, path: &str) -> Result<u64, FsError> {
        self.entries
            .iter()
            .position(|e| e.name == path)
            .map(|i| i as u64)
            .ok_or(FsError::NotFound)
    }

    fn read(&self, inode: u64, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let entry = self.entries.get(inode as usize).ok_or(FsError::NotFound)?;
        let offset = offset as usize;
        if offset >= entry.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(entry.data.len() - offset);
        buf[..n].copy_from_slice(&entry.data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, _inode: u64, _offset: u64, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::IoError)
    }

    fn readdir(&self, _dir_inode: u64) -> Result<Vec<DirEntry>, FsError> {
        Ok(self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| DirEntry {
                name: String::from(e.name),
                inode: i as u64,
                is_directory: false,
            })
            .collect())
    }

    fn unlink(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::IoError)
    }

    fn mkdir(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::IoError)
    }

    fn rmdir(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::IoError)
    }

    fn stat(&self, inode: u64) -> Result<FileStat, FsError> {
        let entry = self.entries.get(inode as usize).ok_or(FsError::NotFound)?;
        Ok(FileStat {
            inode,
            size: entry.data.len() as u64,
            is_directory: false,
        })
    }
}

/// Mount the initrd at `/`. Called once from `process::init()`.
pub fn init() {
    register_driver("/", Initrd::new());
}

#[allow(dead_code)]
fn assert_boxed_driver_object_safe(_d: Box<dyn VfsDriver>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initrd_round_trips_a_registered_file() {
        set_initrd_files(alloc::vec![("/bin/init", b"\x7fELF".as_slice())]);
        let fs = Initrd::new();
        let inode = fs.open("/bin/init").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(inode, 0, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"\x7fELF");
        assert_eq!(fs.open("/nope"), Err(FsError::NotFound));
    }
}
