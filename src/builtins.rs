use std::io::Write;

use crate::job_control::{self, wait_for_foreground};
use crate::jobs::{JobState, JobTable};
use crate::parser::CommandLine;
use crate::signals::{self, SigchldBlocked};

/// The list of all builtin command names.
const BUILTINS: &[&str] = &["quit", "q", "jobs", "fg", "bg", "stop", "wait"];

/// Outcome of builtin dispatch: either the line was handled (0 on success, 1
/// on a reported failure) or the first word is not a builtin and the caller
/// should launch the line as an external pipeline.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    Handled(i32),
    NotBuiltin,
}

/// Returns true if the command name is a shell builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Recognize and run a builtin by the first word of the command line,
/// writing output to the provided streams.
pub fn dispatch(
    line: &CommandLine,
    table: &mut JobTable,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Dispatch {
    let Some(argv) = line.commands.first() else {
        return Dispatch::NotBuiltin;
    };
    if !is_builtin(&argv[0]) {
        return Dispatch::NotBuiltin;
    }
    let args = &argv[1..];

    match argv[0].as_str() {
        "quit" | "q" => Dispatch::Handled(builtin_quit()),
        "jobs" => Dispatch::Handled(builtin_jobs(table, stdout)),
        "fg" => Dispatch::Handled(builtin_fg(args, table, stdout, stderr)),
        "bg" => Dispatch::Handled(builtin_bg(args, table, stdout, stderr)),
        "stop" => Dispatch::Handled(builtin_stop(args, table, stderr)),
        "wait" => Dispatch::Handled(builtin_wait(table)),
        _ => Dispatch::NotBuiltin,
    }
}

/// `quit` / `q`: terminate the shell by signalling our own process.
fn builtin_quit() -> i32 {
    unsafe {
        let pid = libc::getpid();
        libc::kill(pid, libc::SIGTERM);
    }
    // Only reached if the signal could not be delivered.
    1
}

/// `jobs`: one line per live job, in table order.
fn builtin_jobs(table: &mut JobTable, stdout: &mut dyn Write) -> i32 {
    let _blocked = SigchldBlocked::new();
    signals::drain(table);

    for job in table.list() {
        let _ = writeln!(
            stdout,
            "[{}] {} {:<10} {}",
            job.id,
            job.pgid,
            job.state.label(),
            job.cmdline
        );
    }
    0
}

/// `fg`: move a job to the foreground and wait for it. With no argument the
/// highest-id job not already in the foreground is chosen.
fn builtin_fg(
    args: &[String],
    table: &mut JobTable,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let blocked = SigchldBlocked::new();

    let target = match args.first() {
        Some(token) => table.resolve_reference(token),
        None => table.fg_candidate_id(),
    };
    let job = target.and_then(|id| table.find_by_id(id));
    let Some(job) = job else {
        drop(blocked);
        match args.first() {
            Some(token) => {
                let _ = writeln!(stderr, "fg: {token}: no such job");
            }
            None => {
                let _ = writeln!(stderr, "fg: no such job");
            }
        }
        return 1;
    };

    let id = job.id;
    let pgid = job.pgid;
    let _ = writeln!(stdout, "{}", job.cmdline);
    table.set_state(id, JobState::Foreground);

    // The waiter re-blocks SIGCHLD itself; its suspend needs the signal
    // unblocked in the saved mask, so release ours first.
    drop(blocked);

    if let Err(err) = job_control::send_signal_to_group(pgid, libc::SIGCONT) {
        // ESRCH means the group died before we could continue it; the
        // waiter's reaper will retire the job.
        if err.raw_os_error() != Some(libc::ESRCH) {
            let _ = writeln!(stderr, "fg: {err}");
        }
    }
    wait_for_foreground(table, pgid);
    0
}

/// `bg`: resume a job in the background. The job argument is required.
fn builtin_bg(
    args: &[String],
    table: &mut JobTable,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let Some(token) = args.first() else {
        let _ = writeln!(stderr, "bg: missing job argument");
        return 1;
    };

    let _blocked = SigchldBlocked::new();
    let job = table.resolve_reference(token).and_then(|id| table.find_by_id(id));
    let Some(job) = job else {
        let _ = writeln!(stderr, "bg: {token}: no such job");
        return 1;
    };

    let id = job.id;
    let pgid = job.pgid;
    let cmdline = job.cmdline.clone();
    table.set_state(id, JobState::Running);
    let _ = writeln!(stdout, "[{id}] {pgid} {cmdline}");

    if let Err(err) = job_control::send_signal_to_group(pgid, libc::SIGCONT) {
        if err.raw_os_error() != Some(libc::ESRCH) {
            let _ = writeln!(stderr, "bg: {err}");
            return 1;
        }
    }
    0
}

/// `stop`: suspend a job's whole group. The recorded state is not touched
/// here; the reaper's handling of the resulting stop notification is the
/// authoritative transition.
fn builtin_stop(args: &[String], table: &mut JobTable, stderr: &mut dyn Write) -> i32 {
    let Some(token) = args.first() else {
        let _ = writeln!(stderr, "stop: missing job argument");
        return 1;
    };

    let pgid = {
        let _blocked = SigchldBlocked::new();
        let job = table.resolve_reference(token).and_then(|id| table.find_by_id(id));
        match job {
            Some(job) => job.pgid,
            None => {
                let _ = writeln!(stderr, "stop: {token}: no such job");
                return 1;
            }
        }
    };

    if let Err(err) = job_control::send_signal_to_group(pgid, libc::SIGTSTP) {
        let _ = writeln!(stderr, "stop: {err}");
        return 1;
    }
    0
}

/// `wait`: block until no job is Running or Stopped.
fn builtin_wait(table: &mut JobTable) -> i32 {
    let blocked = SigchldBlocked::new();
    loop {
        signals::drain(table);
        if !table.has_active_jobs() {
            break;
        }
        blocked.suspend();
    }
    0
}
