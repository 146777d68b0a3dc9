//! Thin wrappers over `kill(2)` and `/proc` for worker supervision.

use std::io;

fn to_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

fn esrch_is_ok(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Signal one process. "No such process" counts as delivered.
pub(crate) fn signal_pid(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let Some(pid) = to_pid(pid) else {
        return Ok(());
    };
    // SAFETY: kill has no memory-safety preconditions; pid is strictly positive.
    esrch_is_ok(unsafe { libc::kill(pid, signal) })
}

/// Signal every process in a group.
pub(crate) fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if pgid <= 1 {
        return Ok(());
    }
    // SAFETY: as above; pgid > 1 so this never targets our own group or init.
    esrch_is_ok(unsafe { libc::killpg(pgid, signal) })
}

/// Group id of a worker spawned as its own group leader.
///
/// Falls back to the pid itself once the leader has been reaped, since the group
/// keeps the leader's id for as long as any member lives. A live process that
/// leads no group of its own yields `None`.
pub(crate) fn leader_group(pid: u32) -> Option<libc::pid_t> {
    let own = to_pid(pid)?;
    match process_group_of(pid) {
        Some(pgid) => (pgid == own).then_some(pgid),
        None => Some(own),
    }
}

pub(crate) fn process_group_of(pid: u32) -> Option<libc::pid_t> {
    let pid = to_pid(pid)?;
    // SAFETY: getpgid only reads kernel state for the given pid.
    let pgid = unsafe { libc::getpgid(pid) };
    (pgid > 0).then_some(pgid)
}

struct Stat {
    state: char,
    ppid: u32,
}

fn read_stat(pid: u32) -> Option<Stat> {
    let raw = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // `pid (comm) state ppid ...`; comm may contain spaces and parens.
    let rest = &raw[raw.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some(Stat { state, ppid })
}

/// True while the pid names a live, non-zombie process.
pub(crate) fn is_running(pid: u32) -> bool {
    let Some(raw) = to_pid(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(raw, 0) };
    let exists = rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    if !exists {
        return false;
    }
    match read_stat(pid) {
        Some(stat) => stat.state != 'Z' && stat.state != 'X',
        None => true,
    }
}

/// Direct children of `pid`, found by scanning `/proc/*/stat`.
pub(crate) fn child_pids(pid: u32) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
        .filter(|candidate| read_stat(*candidate).is_some_and(|s| s.ppid == pid))
        .collect()
}

/// Command line of `pid` split on NUL.
pub(crate) fn cmdline(pid: u32) -> Option<Vec<String>> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let args: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|a| !a.is_empty())
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect();
    (!args.is_empty()).then_some(args)
}
