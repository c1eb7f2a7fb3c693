use reclaim_process::{run_command, run_command_checked, CommandSpec, RunCommandError, RunOptions};
use std::time::{Duration, Instant};

fn fixture() -> CommandSpec {
    CommandSpec::new(env!("CARGO_BIN_EXE_reclaim_process_test_helper"))
}

#[test]
fn captures_stdout_lines() {
    let spec = fixture().args(["--print", "Freed: 10 B"]);
    let result = run_command(&spec, &RunOptions::with_timeout(Duration::from_secs(10))).unwrap();

    assert!(result.succeeded());
    assert_eq!(result.output.stdout.trim_end(), "Freed: 10 B");
    assert!(!result.output.truncated);
}

#[test]
fn truncates_output_past_the_cap() {
    let opts = RunOptions {
        max_bytes: 512,
        ..RunOptions::with_timeout(Duration::from_secs(10))
    };
    let spec = fixture().args(["--stdout-bytes", "1048576", "--stderr-bytes", "10"]);
    let result = run_command(&spec, &opts).unwrap();

    assert!(result.status.success());
    assert!(result.output.truncated);
    assert_eq!(result.output.stdout.len(), 512);
    assert_eq!(result.output.stderr.len(), 10);
}

#[test]
fn timeout_kills_the_child() {
    let spec = fixture().args(["--sleep-ms", "10000"]);
    let started = Instant::now();
    let result = run_command(&spec, &RunOptions::with_timeout(Duration::from_millis(100))).unwrap();

    assert!(result.timed_out);
    assert!(!result.succeeded());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(unix)]
#[test]
fn timeout_reaches_grandchildren_holding_the_pipes() {
    let spec = fixture().args(["--spawn-sleeper-ms", "10000", "--sleep-ms", "10000"]);
    let started = Instant::now();
    let result = run_command(&spec, &RunOptions::with_timeout(Duration::from_millis(100))).unwrap();

    assert!(result.timed_out);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "took {:?}",
        started.elapsed()
    );
}

#[test]
fn checked_run_reports_non_zero_exit() {
    let spec = fixture().args(["--exit-code", "2"]);
    let err = run_command_checked(&spec, &RunOptions::with_timeout(Duration::from_secs(10)))
        .unwrap_err();

    match err {
        RunCommandError::Failed { status, .. } => assert_eq!(status.code(), Some(2)),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn checked_run_reports_timeout() {
    let spec = fixture().args(["--sleep-ms", "10000"]);
    let err = run_command_checked(&spec, &RunOptions::with_timeout(Duration::from_millis(50)))
        .unwrap_err();
    assert!(matches!(err, RunCommandError::TimedOut { .. }), "{err}");
}

#[test]
fn missing_program_is_an_io_error() {
    let spec = CommandSpec::new("/definitely/not/here/reclaim-trim-target");
    assert!(run_command(&spec, &RunOptions::default()).is_err());
    let err = run_command_checked(&spec, &RunOptions::default()).unwrap_err();
    assert!(matches!(err, RunCommandError::Io { .. }));
}
