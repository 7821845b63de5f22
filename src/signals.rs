use std::io::{self, Write};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::job_control;
use crate::jobs::JobTable;

// Signal handlers may only perform async-signal-safe work, so they are kept
// to single atomic operations plus kill(2). Reaping and banner printing
// happen on the main flow in `drain`.

/// Set by the SIGCHLD handler, consumed by [`drain`].
static CHILD_PENDING: AtomicBool = AtomicBool::new(false);

/// Process group of the current foreground job, 0 when there is none.
/// Written by the job table after every mutation, read by the SIGINT and
/// SIGTSTP handlers.
static FOREGROUND_PGID: AtomicI32 = AtomicI32::new(0);

pub fn publish_foreground(pgid: libc::pid_t) {
    FOREGROUND_PGID.store(pgid, Ordering::SeqCst);
}

extern "C" fn on_sigchld(_signal: libc::c_int) {
    CHILD_PENDING.store(true, Ordering::SeqCst);
}

extern "C" fn on_sigint(_signal: libc::c_int) {
    forward_to_foreground(libc::SIGINT);
}

extern "C" fn on_sigtstp(_signal: libc::c_int) {
    forward_to_foreground(libc::SIGTSTP);
}

/// Relay a terminal signal to the whole foreground process group. The shell
/// itself never dies or stops from these; with no foreground job the signal
/// goes nowhere.
fn forward_to_foreground(signal: libc::c_int) {
    let pgid = FOREGROUND_PGID.load(Ordering::SeqCst);
    if pgid > 0 {
        unsafe {
            libc::kill(-pgid, signal);
        }
    }
}

/// Install the shell's signal world. When stdin is a terminal the shell is
/// placed in its own process group and made the terminal's foreground group
/// first. SIGTTOU/SIGTTIN are ignored so later terminal hand-overs cannot
/// stop the shell.
pub fn install() -> io::Result<()> {
    if job_control::stdin_is_tty() {
        let pid = unsafe { libc::getpid() };
        if unsafe { libc::setpgid(pid, pid) } < 0 {
            return Err(io::Error::last_os_error());
        }
        job_control::set_terminal_foreground(libc::STDIN_FILENO, pid)?;
    }

    // SIGCHLD deliberately lacks SA_RESTART: a child notification must make
    // the blocking command-line read return EINTR so the reaper runs at the
    // prompt instead of waiting for the next Enter.
    install_handler(libc::SIGCHLD, on_sigchld, 0)?;
    install_handler(libc::SIGINT, on_sigint, libc::SA_RESTART)?;
    install_handler(libc::SIGTSTP, on_sigtstp, libc::SA_RESTART)?;
    ignore_signal(libc::SIGTTOU)?;
    ignore_signal(libc::SIGTTIN)?;
    Ok(())
}

fn install_handler(
    signal: libc::c_int,
    handler: extern "C" fn(libc::c_int),
    flags: libc::c_int,
) -> io::Result<()> {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler as usize;
    action.sa_flags = flags;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signal, &action, std::ptr::null_mut()) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn ignore_signal(signal: libc::c_int) -> io::Result<()> {
    if unsafe { libc::signal(signal, libc::SIG_IGN) } == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn empty_sigset() -> libc::sigset_t {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(set.as_mut_ptr());
        set.assume_init()
    }
}

/// Unblock SIGCHLD in the calling process. Spawned children run this between
/// fork and exec so they do not inherit the orchestrator's temporary mask;
/// everything here is async-signal-safe.
pub(crate) fn unblock_sigchld() {
    let mut set = empty_sigset();
    unsafe {
        libc::sigaddset(&mut set, libc::SIGCHLD);
        libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
    }
}

/// Blocks SIGCHLD for its lifetime and restores the previous mask on drop.
/// Brackets every read-then-mutate sequence on the job table so a child
/// notification cannot slip between the read and the write.
pub struct SigchldBlocked {
    saved: libc::sigset_t,
}

impl SigchldBlocked {
    pub fn new() -> Self {
        let mut block = empty_sigset();
        let mut saved = empty_sigset();
        unsafe {
            libc::sigaddset(&mut block, libc::SIGCHLD);
            libc::sigprocmask(libc::SIG_BLOCK, &block, &mut saved);
        }
        SigchldBlocked { saved }
    }

    /// Atomically restore the saved mask and sleep until any signal arrives.
    /// Only useful when the guard was created with SIGCHLD unblocked; a guard
    /// nested inside another one would sleep through child notifications.
    pub fn suspend(&self) {
        unsafe {
            libc::sigsuspend(&self.saved);
        }
    }
}

impl Drop for SigchldBlocked {
    fn drop(&mut self) {
        unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.saved, std::ptr::null_mut());
        }
    }
}

/// Collect every child state change without blocking and apply it to the job
/// table: stopped members mark their job Stopped (with a banner on the first
/// stop), exited members are struck from their job, and a job's last exit
/// retires it (with a Done banner for background jobs). No-op unless a
/// SIGCHLD arrived since the last call.
///
/// Runs before each prompt, whenever a signal interrupts the command-line
/// read, and on every wakeup inside the foreground/`wait` loops.
pub fn drain(table: &mut JobTable) {
    if !CHILD_PENDING.swap(false, Ordering::SeqCst) {
        return;
    }
    let _blocked = SigchldBlocked::new();
    let mut status: libc::c_int = 0;
    loop {
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED) };
        if pid == 0 {
            break; // children remain but none changed state
        }
        if pid < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            break; // ECHILD: nothing left to reap
        }
        if unsafe { libc::WIFSTOPPED(status) } {
            if let Some(job) = table.record_stop(pid) {
                print!("\n[{}] {} Stopped  {}\n", job.id, job.pgid, job.cmdline);
                let _ = io::stdout().flush();
            }
        } else if unsafe { libc::WIFEXITED(status) } || unsafe { libc::WIFSIGNALED(status) } {
            if let Some(job) = table.record_exit(pid) {
                println!("[{}] {} Done     {}", job.id, job.pgid, job.cmdline);
                let _ = io::stdout().flush();
            }
        }
    }
}
