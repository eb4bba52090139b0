//! Process groups and sessions.

use spin::Mutex;

use super::pcb::Pid;
use crate::error::Errno;

/// The session's foreground process group for its controlling terminal;
/// `0` means none assigned yet.
static FOREGROUND_PGID: Mutex<Pid> = Mutex::new(0);

/// `setsid`: a non-leader process becomes a new session and
/// process-group leader, and drops its controlling terminal.
pub fn setsid(pid: Pid) -> Result<Pid, Errno> {
    let pcb = super::lookup(pid).ok_or(Errno::ECHILD)?;
    let mut group = pcb.group.lock();
    if group.is_session_leader {
        return Err(Errno::EPERM);
    }
    group.sid = pid;
    group.pgid = pid;
    group.is_session_leader = true;
    group.is_group_leader = true;
    group.has_controlling_terminal = false;
    Ok(pid)
}

/// `setpgid`: move `pid` into `pgid` within its own session.
/// Session leaders may not be moved.
pub fn setpgid(pid: Pid, pgid: Pid) -> Result<(), Errno> {
    let pcb = super::lookup(pid).ok_or(Errno::ECHILD)?;
    let mut group = pcb.group.lock();
    if group.is_session_leader {
        return Err(Errno::EPERM);
    }
    let target_pgid = if pgid == 0 { pid } else { pgid };
    group.pgid = target_pgid;
    group.is_group_leader = target_pgid == pid;
    Ok(())
}

/// `tcsetpgrp`: only a session leader with a controlling terminal
/// may set the foreground group.
pub fn tcsetpgrp(pid: Pid, pgid: Pid) -> Result<(), Errno> {
    let pcb = super::lookup(pid).ok_or(Errno::ECHILD)?;
    let group = pcb.group.lock();
    if !group.is_session_leader || !group.has_controlling_terminal {
        return Err(Errno::EPERM);
    }
    *FOREGROUND_PGID.lock() = pgid;
    Ok(())
}

pub fn tcgetpgrp() -> Pid {
    *FOREGROUND_PGID.lock()
}

#[cfg(test)]
mod tests {
    // Group/session transitions that don't require a live scheduler are
    // covered indirectly through `process_lifecycle` integration tests;
    // the pure foreground-pgid bookkeeping is exercised here.
    use super::*;

    #[test]
    fn foreground_pgid_defaults_to_zero() {
        assert_eq!(tcgetpgrp(), 0);
    }
}
