use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use crate::job_control::{self, wait_for_foreground};
use crate::jobs::{JobState, JobTable, MAX_JOBS, TableFull};
use crate::parser::CommandLine;
use crate::signals::{self, SigchldBlocked};

/// Exit status a child reports when its program cannot be located.
const NOT_FOUND_STATUS: i32 = 127;

/// Reconstruct the display form of a pipeline: stages joined by " | ", with
/// a trailing " &" for background launches. This becomes the job's stored
/// command text.
pub fn build_command_text(line: &CommandLine) -> String {
    let mut text = String::new();
    for (i, argv) in line.commands.iter().enumerate() {
        if i > 0 {
            text.push_str(" | ");
        }
        text.push_str(&argv.join(" "));
    }
    if line.background {
        text.push_str(" &");
    }
    text
}

/// Standard input for the pipeline's first stage. `None` means inherit the
/// shell's own stdin.
fn resolve_input(line: &CommandLine) -> io::Result<Option<Stdio>> {
    if let Some(path) = &line.infile {
        let file = File::open(path).map_err(|err| annotate(path, err))?;
        return Ok(Some(Stdio::from(file)));
    }
    // Background pipelines with no explicit input read end-of-file instead
    // of competing with the shell for the terminal.
    if line.background {
        return Ok(Some(Stdio::null()));
    }
    Ok(None)
}

/// Standard output for the pipeline's last stage. `None` means inherit.
fn resolve_output(line: &CommandLine) -> io::Result<Option<Stdio>> {
    if let Some(path) = &line.outfile {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(line.append)
            .truncate(!line.append)
            .mode(0o644)
            .open(path)
            .map_err(|err| annotate(path, err))?;
        return Ok(Some(Stdio::from(file)));
    }
    // When the shell itself is not writing to a terminal, unredirected
    // background output would interleave with the shell's own; drop it.
    if line.background && !job_control::stdout_is_tty() {
        return Ok(Some(Stdio::null()));
    }
    Ok(None)
}

fn annotate(path: &str, err: io::Error) -> io::Error {
    io::Error::new(err.kind(), format!("{path}: {err}"))
}

/// Runs between fork and exec in each spawned child: restore the default
/// signal world the shell altered for itself, then join the pipeline's
/// process group. `pgid` 0 means this child is the first stage and founds
/// the group with its own pid. Only async-signal-safe calls are allowed
/// here.
fn prepare_child(pgid: libc::pid_t) -> io::Result<()> {
    signals::unblock_sigchld();
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
        libc::signal(libc::SIGTSTP, libc::SIG_DFL);
        // The Rust runtime ignores SIGPIPE and exec preserves that; a
        // pipeline stage must die on a closed pipe like any other program.
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        if libc::setpgid(0, pgid) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Launch a parsed pipeline as one job: spawn one process per stage, wire
/// the pipes and redirections, put every process in a single group, register
/// the job, and wait if it runs in the foreground.
///
/// Returns 0 once at least one stage ran, the not-found or launch-failure
/// status when nothing could be spawned, 1 when a redirection target failed
/// to open, and -1 when pipe creation failed.
pub fn run_pipeline(line: &CommandLine, table: &mut JobTable) -> i32 {
    let cmdline = build_command_text(line);

    // Hold SIGCHLD for the whole spawn-and-register sequence so the reaper
    // cannot observe a process whose job is not in the table yet.
    let blocked = SigchldBlocked::new();

    let mut input = match resolve_input(line) {
        Ok(stdio) => stdio,
        Err(err) => {
            eprintln!("gsh: {err}");
            return 1;
        }
    };
    let mut output = match resolve_output(line) {
        Ok(stdio) => stdio,
        Err(err) => {
            eprintln!("gsh: {err}");
            return 1;
        }
    };

    let last = line.commands.len() - 1;
    let mut prev_read: Option<os_pipe::PipeReader> = None;
    let mut pgid: libc::pid_t = 0;
    let mut procs: Vec<libc::pid_t> = Vec::with_capacity(line.commands.len());
    let mut launch_failure = 0;

    for (i, argv) in line.commands.iter().enumerate() {
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);

        // First stage reads the resolved input; later stages read the pipe
        // left by their predecessor.
        if i == 0 {
            if let Some(stdio) = input.take() {
                command.stdin(stdio);
            }
        } else if let Some(read) = prev_read.take() {
            command.stdin(read);
        }

        // Interior stages feed the next pipe; the last stage writes to the
        // resolved output. Pipe fds are close-on-exec, so a child only keeps
        // the ends wired into its stdio, and the parent's copies close when
        // `command` is dropped at the end of this iteration.
        let mut next_read = None;
        if i < last {
            let (read, write) = match os_pipe::pipe() {
                Ok(ends) => ends,
                Err(err) => {
                    eprintln!("gsh: pipe: {err}");
                    return -1;
                }
            };
            command.stdout(write);
            next_read = Some(read);
        } else if let Some(stdio) = output.take() {
            command.stdout(stdio);
        }

        let join_pgid = pgid;
        unsafe {
            command.pre_exec(move || prepare_child(join_pgid));
        }

        match command.spawn() {
            Ok(child) => {
                let pid = child.id() as libc::pid_t;
                if pgid == 0 {
                    pgid = pid;
                }
                // Repeat the group assignment from this side: the child may
                // already have exec'd before running its own setpgid.
                let _ = job_control::set_process_group(pid, pgid);
                procs.push(pid);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                println!("{}: command not found", argv[0]);
                launch_failure = NOT_FOUND_STATUS;
            }
            Err(err) => {
                eprintln!("gsh: {}: {err}", argv[0]);
                launch_failure = 1;
            }
        }

        prev_read = next_read;
    }

    let spawned = procs.len();
    if spawned > 0 {
        let state = if line.background {
            JobState::Running
        } else {
            JobState::Foreground
        };
        match table.add(pgid, state, &cmdline, procs) {
            Ok(id) => {
                if line.background {
                    println!("[{id}] {pgid}");
                }
            }
            Err(TableFull) => {
                eprintln!("gsh: job table full (max {MAX_JOBS}); pipeline not tracked");
            }
        }
    }

    // Table and reality agree again; let child notifications flow.
    drop(blocked);

    if spawned > 0 && !line.background {
        wait_for_foreground(table, pgid);
    }

    if spawned == 0 { launch_failure } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn command_text_joins_stages_with_pipes() {
        let line = CommandLine {
            commands: vec![argv(&["cat", "notes"]), argv(&["sort"]), argv(&["uniq"])],
            ..CommandLine::default()
        };
        assert_eq!(build_command_text(&line), "cat notes | sort | uniq");
    }

    #[test]
    fn command_text_marks_background() {
        let line = CommandLine {
            commands: vec![argv(&["a"]), argv(&["b", "-x"])],
            outfile: Some("out".to_string()),
            background: true,
            ..CommandLine::default()
        };
        assert_eq!(build_command_text(&line), "a | b -x &");
    }

    #[test]
    fn command_text_single_stage() {
        let line = CommandLine {
            commands: vec![argv(&["sleep", "100"])],
            background: true,
            ..CommandLine::default()
        };
        assert_eq!(build_command_text(&line), "sleep 100 &");
    }

    #[test]
    fn missing_input_file_reports_the_path() {
        let line = CommandLine {
            commands: vec![argv(&["cat"])],
            infile: Some("/definitely/not/here".to_string()),
            ..CommandLine::default()
        };
        let err = resolve_input(&line).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"));
    }

    #[test]
    fn foreground_without_redirection_inherits_stdio() {
        let line = CommandLine {
            commands: vec![argv(&["cat"])],
            ..CommandLine::default()
        };
        assert!(resolve_input(&line).unwrap().is_none());
        assert!(resolve_output(&line).unwrap().is_none());
    }

    #[test]
    fn background_without_redirection_reads_null() {
        let line = CommandLine {
            commands: vec![argv(&["cat"])],
            background: true,
            ..CommandLine::default()
        };
        assert!(resolve_input(&line).unwrap().is_some());
    }
}
