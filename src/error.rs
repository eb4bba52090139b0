//! Kernel error model (C15): each subsystem owns a narrow typed error
//! enum for internal plumbing; at the syscall boundary every one of them
//! collapses into the single POSIX-shaped [`Errno`] the ABI exposes.

use core::fmt;

/// Memory-management failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    OutOfFrames,
    OutOfVirtualSpace,
    AddressAlreadyMapped,
    AddressNotMapped,
    NotAligned,
    InvalidOrder,
    VmaOverlap,
    NoSuchVma,
    PermissionDenied,
}

impl From<MmError> for Errno {
    fn from(e: MmError) -> Self {
        match e {
            MmError::OutOfFrames | MmError::OutOfVirtualSpace => Errno::ENOMEM,
            MmError::AddressAlreadyMapped => Errno::EEXIST,
            MmError::AddressNotMapped | MmError::NoSuchVma => Errno::EFAULT,
            MmError::NotAligned | MmError::InvalidOrder => Errno::EINVAL,
            MmError::VmaOverlap => Errno::EINVAL,
            MmError::PermissionDenied => Errno::EACCES,
        }
    }
}

/// Process lifecycle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    TooManyProcesses,
    NoSuchProcess,
    NotAChild,
    FdTableFull,
    BadFd,
    ElfMalformed,
    ExecFailed,
}

impl From<ProcessError> for Errno {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::TooManyProcesses => Errno::EAGAIN,
            ProcessError::NoSuchProcess | ProcessError::NotAChild => Errno::ECHILD,
            ProcessError::FdTableFull => Errno::EMFILE,
            ProcessError::BadFd => Errno::EBADF,
            ProcessError::ElfMalformed | ProcessError::ExecFailed => Errno::ENOEXEC,
        }
    }
}

/// Filesystem/VFS metadata failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotADirectory,
    IsADirectory,
    NameTooLong,
    IoError,
    AlreadyExists,
    NotEmpty,
}

impl From<FsError> for Errno {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound => Errno::ENOENT,
            FsError::NotADirectory => Errno::ENOTDIR,
            FsError::IsADirectory => Errno::EISDIR,
            FsError::NameTooLong => Errno::ENAMETOOLONG,
            FsError::IoError => Errno::EIO,
            FsError::AlreadyExists => Errno::EEXIST,
            FsError::NotEmpty => Errno::ENOTEMPTY,
        }
    }
}

/// The POSIX-shaped error codes returned to user space through the
/// syscall ABI, a deliberately small subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    EPERM = 1,
    ENOENT = 2,
    EIO = 5,
    EBADF = 9,
    EAGAIN = 11,
    ENOMEM = 12,
    EACCES = 13,
    EFAULT = 14,
    EEXIST = 17,
    ENOTDIR = 20,
    EISDIR = 21,
    EINVAL = 22,
    ENAMETOOLONG = 36,
    ENOSYS = 38,
    EMFILE = 24,
    ECHILD = 10,
    ENOEXEC = 8,
    E2BIG = 7,
    EBUSY = 16,
    ENOTEMPTY = 39,
    ESPIPE = 29,
    EPIPE = 32,
    ERANGE = 34,
    ENOSPC = 28,
    ESRCH = 3,
}

impl Errno {
    /// Negated, as the syscall ABI returns it from a failing syscall.
    pub fn as_negative_isize(self) -> isize {
        -(self as i32 as isize)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A marker type for invariant violations that should bring the kernel
/// down immediately rather than be threaded through a `Result` (a corrupt
/// scheduler run-queue, a double-free in the frame allocator). Carried by
/// `panic!` call sites rather than returned.
#[derive(Debug)]
pub struct KernelPanic(pub &'static str);

impl fmt::Display for KernelPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel invariant violated: {}", self.0)
    }
}
