use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

/// `reclaim` run from an empty directory so no stray `reclaim.toml` applies.
fn reclaim(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("reclaim"));
    cmd.current_dir(dir.path())
        .env_remove("RECLAIM_CONFIG_PATH")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_modes() {
    let temp = TempDir::new().unwrap();
    reclaim(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--check"))
        .stdout(predicate::str::contains("--cleanup"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn check_prints_status_and_process_table() {
    let temp = TempDir::new().unwrap();
    reclaim(&temp)
        .arg("--check")
        .assert()
        .success()
        .stdout(predicate::str::contains("CURRENT RAM STATUS"))
        .stdout(predicate::str::contains("System Total:"))
        .stdout(predicate::str::contains("MEMORY-CONSUMING PROCESSES"));
}

#[test]
fn check_json_is_machine_readable() {
    let temp = TempDir::new().unwrap();
    let output = reclaim(&temp)
        .args(["--check", "--json", "--top", "3"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value["snapshot"]["system_total_bytes"].as_u64().unwrap() > 0);
    let processes = value["top_processes"].as_array().unwrap();
    assert!(processes.len() <= 3);
    for process in processes {
        assert!(process["pid"].is_u64());
        assert!(process["resident_bytes"].is_u64());
    }
}

#[test]
fn check_and_cleanup_are_mutually_exclusive() {
    let temp = TempDir::new().unwrap();
    reclaim(&temp)
        .args(["--check", "--cleanup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn cleanup_json_reports_a_full_cycle() {
    let temp = TempDir::new().unwrap();
    temp.child("reclaim.toml")
        .write_str("[cleanup]\naggressive_trim = false\n\n[logging]\nstderr = false\n")
        .unwrap();

    let output = reclaim(&temp)
        .args(["--cleanup", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["gc_passes"].as_array().unwrap().len(), 3);
    assert!(value["before"]["system_total_bytes"].as_u64().unwrap() > 0);
    assert!(value["after"]["system_total_bytes"].as_u64().unwrap() > 0);
    let skipped_trim = value["steps"].as_array().unwrap().iter().any(|step| {
        step["name"] == "trim" && step["outcome"] == "skipped"
    });
    assert!(skipped_trim, "{value:#}");
}

#[test]
fn cleanup_prints_human_report() {
    let temp = TempDir::new().unwrap();
    temp.child("reclaim.toml")
        .write_str("[cleanup]\naggressive_trim = false\n")
        .unwrap();

    reclaim(&temp)
        .arg("--cleanup")
        .assert()
        .success()
        .stdout(predicate::str::contains("BEFORE CLEANUP"))
        .stdout(predicate::str::contains("AFTER CLEANUP"))
        .stdout(predicate::str::contains("CLEANUP RESULTS"));
}

#[test]
fn menu_exit_returns_zero() {
    let temp = TempDir::new().unwrap();
    reclaim(&temp)
        .write_stdin("3\n")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("1. Check RAM only"))
        .stdout(predicate::str::contains("2. Force cleanup RAM"))
        .stdout(predicate::str::contains("Exiting."));
}

#[test]
fn menu_check_runs_check() {
    let temp = TempDir::new().unwrap();
    reclaim(&temp)
        .write_stdin("1\n")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("CURRENT RAM STATUS"));
}

#[test]
fn menu_invalid_choice_returns_one() {
    let temp = TempDir::new().unwrap();
    reclaim(&temp)
        .write_stdin("7\n")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Invalid option."));
}

#[test]
fn menu_eof_is_an_interrupt() {
    let temp = TempDir::new().unwrap();
    reclaim(&temp)
        .write_stdin("")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Interrupted."));
}

#[test]
fn missing_config_file_exits_two() {
    let temp = TempDir::new().unwrap();
    reclaim(&temp)
        .args(["--config", "missing.toml", "--check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn invalid_config_exits_two_without_echoing_values() {
    let temp = TempDir::new().unwrap();
    temp.child("reclaim.toml")
        .write_str("[cleanup]\nmin_free_disk_gb = \"plenty\"\n")
        .unwrap();

    reclaim(&temp)
        .arg("--check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to parse toml config"))
        .stderr(predicate::str::contains("plenty").not());
}

#[test]
fn config_env_var_is_honored() {
    let temp = TempDir::new().unwrap();
    temp.child("custom.toml")
        .write_str("[helper]\nbogus = 1\n")
        .unwrap();

    reclaim(&temp)
        .env("RECLAIM_CONFIG_PATH", "custom.toml")
        .arg("--check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to parse toml config"));
}
