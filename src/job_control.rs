use std::io;

use crate::jobs::JobTable;
use crate::signals::{self, SigchldBlocked};

pub(crate) fn stdin_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

pub(crate) fn stdout_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDOUT_FILENO) == 1 }
}

pub(crate) fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Already exec'd or gone; the child-side setpgid won the race.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

pub(crate) fn send_signal_to_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Make `pgid` the terminal's foreground process group on `fd`. The caller
/// must have SIGTTOU ignored; `signals::install` does that for the shell's
/// whole lifetime.
pub(crate) fn set_terminal_foreground(fd: libc::c_int, pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        let rc = unsafe { libc::tcsetpgrp(fd, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Hands the terminal to a job's process group for the duration of a
/// foreground wait and returns it to the shell's group on drop. Does nothing
/// when stdin is not a terminal.
pub(crate) struct ForegroundTerminalGuard {
    tty_fd: Option<libc::c_int>,
    shell_pgid: libc::pid_t,
}

impl ForegroundTerminalGuard {
    pub(crate) fn new(target_pgid: libc::pid_t) -> Self {
        let tty_fd = stdin_is_tty().then_some(libc::STDIN_FILENO);
        let shell_pgid = unsafe { libc::getpgrp() };

        if let Some(fd) = tty_fd {
            // The whole group can die before the transfer lands; that narrow
            // race is not an error.
            if let Err(err) = set_terminal_foreground(fd, target_pgid) {
                if !matches!(err.raw_os_error(), Some(libc::ESRCH) | Some(libc::EPERM)) {
                    eprintln!("gsh: tcsetpgrp: {err}");
                }
            }
        }

        Self { tty_fd, shell_pgid }
    }
}

impl Drop for ForegroundTerminalGuard {
    fn drop(&mut self) {
        if let Some(fd) = self.tty_fd {
            let _ = set_terminal_foreground(fd, self.shell_pgid);
        }
    }
}

/// Block until the table no longer holds a foreground job. Terminal
/// ownership follows the job for the duration. The reaper runs on every
/// wakeup, so stopping the job (which leaves it in the table as Stopped)
/// releases the wait just like termination does.
pub(crate) fn wait_for_foreground(table: &mut JobTable, pgid: libc::pid_t) {
    let _terminal = ForegroundTerminalGuard::new(pgid);
    let blocked = SigchldBlocked::new();
    loop {
        signals::drain(table);
        if table.find_foreground().is_none() {
            break;
        }
        blocked.suspend();
    }
}
