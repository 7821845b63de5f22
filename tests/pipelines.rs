use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

fn run_shell(lines: &[&str]) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_gsh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn gsh");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
    }
    child.wait_with_output().expect("wait output")
}

fn temp_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("gsh-test-{}-{name}", std::process::id()));
    path
}

#[test]
fn pipeline_stages_feed_each_other() {
    let output = run_shell(&["echo hello | cat | tr a-z A-Z"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("HELLO"), "stdout was: {stdout}");
    assert!(output.status.success());
}

#[test]
fn pipeline_sigpipe_does_not_abort_shell() {
    // yes writes indefinitely; head -1 exits after one line, closing the read
    // end. yes dies on SIGPIPE (restored to SIG_DFL in the child) and the
    // shell runs the next command.
    let output = run_shell(&["yes | head -1", "echo ALIVE"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn pipeline_stages_share_one_process_group() {
    use std::io::Read;

    let mut child = Command::new(env!("CARGO_BIN_EXE_gsh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn gsh");

    let mut stdin = child.stdin.take().expect("stdin");
    let mut stdout = child.stdout.take().expect("stdout");

    writeln!(stdin, "sleep 2 | sleep 2 | sleep 2 &").expect("write line");

    // Read the launch announcement to learn the group id. The prompt has no
    // trailing newline, so read raw chunks and only accept the number once a
    // non-digit follows it.
    let mut seen = String::new();
    let mut buf = [0u8; 256];
    let pgid = loop {
        let n = stdout.read(&mut buf).expect("read shell output");
        assert!(n > 0, "shell closed stdout early, output was: {seen}");
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        if let Some(at) = seen.find("[1] ") {
            let digits: String = seen[at + 4..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() && seen.len() > at + 4 + digits.len() {
                break digits;
            }
        }
    };

    // All three stages must be members of the announced group while the
    // pipeline runs.
    let ps = Command::new("ps")
        .args(["-eo", "pgid=,comm="])
        .output()
        .expect("run ps");
    let listing = String::from_utf8_lossy(&ps.stdout);
    let members = listing
        .lines()
        .filter(|line| {
            let mut fields = line.split_whitespace();
            fields.next() == Some(pgid.as_str()) && fields.next() == Some("sleep")
        })
        .count();
    assert_eq!(members, 3, "group {pgid} in ps listing:\n{listing}");

    writeln!(stdin, "wait").expect("write line");
    drop(stdin);

    let status = child.wait().expect("wait for shell");
    let mut rest = String::new();
    stdout.read_to_string(&mut rest).expect("drain stdout");
    seen.push_str(&rest);

    assert!(
        seen.contains(&format!("[1] {pgid} Done     sleep 2 | sleep 2 | sleep 2 &")),
        "output was: {seen}"
    );
    assert!(status.success());
}

#[test]
fn foreground_pipeline_leaves_no_job_behind() {
    let output = run_shell(&["echo one | cat", "jobs", "echo marker"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    // jobs prints nothing between the pipeline output and the marker.
    let after_one = &stdout[stdout.find("one").expect("pipeline output")..];
    assert!(!after_one.contains("[1]"), "stdout was: {stdout}");
    assert!(stdout.contains("marker"), "stdout was: {stdout}");
}

#[test]
fn output_redirection_truncates_and_appends() {
    let path = temp_path("redirect");
    let path_str = path.to_str().expect("utf8 path");

    let first = format!("echo first > {path_str}");
    let second = format!("echo second >> {path_str}");
    run_shell(&[&first, &second]);
    assert_eq!(
        fs::read_to_string(&path).expect("file written"),
        "first\nsecond\n"
    );

    let third = format!("echo third > {path_str}");
    run_shell(&[&third]);
    assert_eq!(fs::read_to_string(&path).expect("file written"), "third\n");

    let _ = fs::remove_file(&path);
}

#[test]
fn input_redirection_reads_the_file() {
    let path = temp_path("input");
    let path_str = path.to_str().expect("utf8 path");
    fs::write(&path, "from-the-file\n").expect("seed file");

    let line = format!("cat < {path_str}");
    let output = run_shell(&[&line]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("from-the-file"), "stdout was: {stdout}");

    let _ = fs::remove_file(&path);
}

#[test]
fn missing_input_file_aborts_the_pipeline() {
    let output = run_shell(&["cat < /definitely/not/here", "echo still-alive"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/definitely/not/here"), "stderr was: {stderr}");
    assert!(stdout.contains("still-alive"), "stdout was: {stdout}");
    assert!(output.status.success());
}

#[test]
fn unknown_command_reports_not_found_and_shell_survives() {
    let output = run_shell(&["definitely-not-a-command-xyz", "echo still-alive"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("definitely-not-a-command-xyz: command not found"),
        "stdout was: {stdout}"
    );
    assert!(stdout.contains("still-alive"), "stdout was: {stdout}");
    assert!(output.status.success());
}

#[test]
fn not_found_inside_a_pipeline_does_not_kill_the_rest() {
    let output = run_shell(&["echo data | definitely-not-a-command-xyz | cat", "echo after"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("definitely-not-a-command-xyz: command not found"),
        "stdout was: {stdout}"
    );
    assert!(stdout.contains("after"), "stdout was: {stdout}");
}

#[test]
fn parse_errors_are_reported_and_the_shell_continues() {
    let output = run_shell(&["echo hi |", "sort <", "echo ok"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("error: missing command after '|'"),
        "stdout was: {stdout}"
    );
    assert!(
        stdout.contains("error: missing file name after '<'"),
        "stdout was: {stdout}"
    );
    assert!(stdout.contains("ok"), "stdout was: {stdout}");
    assert!(output.status.success());
}

#[test]
fn background_job_without_input_reads_eof_and_finishes() {
    // cat inherits no terminal: its stdin is the null device, so it exits at
    // once and is announced at the next reaping point.
    let output = run_shell(&["cat &", "sleep 0.3", "echo tail"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[1] "), "stdout was: {stdout}");
    assert!(stdout.contains("Done     cat &"), "stdout was: {stdout}");
    assert!(stdout.contains("tail"), "stdout was: {stdout}");
}

#[test]
fn background_pipeline_output_goes_to_its_redirection_target() {
    let path = temp_path("bg-out");
    let path_str = path.to_str().expect("utf8 path");

    let line = format!("echo bg-payload > {path_str} &");
    let output = run_shell(&[&line, "wait"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[1] "), "stdout was: {stdout}");
    assert_eq!(
        fs::read_to_string(&path).expect("file written"),
        "bg-payload\n"
    );

    let _ = fs::remove_file(&path);
}
