//! CLI tests: spawn the `loopctl` binary against shell-script workers and
//! check exit codes and on-disk artifacts.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output};

use loopctl::exit_codes;
use loopctl::io::notify::WEBHOOK_ENV;

const PLAN: &str = "# Plan\n\n## T1: First\n## T2: Second\n";

/// Install a worker script that prints `reply` and exits with `code`.
fn install_worker(root: &Path, reply: &str, code: i32) {
    let script = root.join("worker.sh");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\ncat > /dev/null\necho \"$*\" | tr '\\n' ' ' >> '{log}'\necho >> '{log}'\ncat <<'JSON'\n{reply}\nJSON\nexit {code}\n",
            log = root.join("args.log").display()
        ),
    )
    .expect("write worker");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

    fs::create_dir_all(root.join(".loopctl")).expect("mkdir");
    fs::write(
        root.join(".loopctl/config.toml"),
        format!("[worker]\ncommand = \"{}\"\n", script.display()),
    )
    .expect("write config");
}

fn loopctl(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_loopctl"))
        .current_dir(root)
        .env_remove(WEBHOOK_ENV)
        .args(args)
        .output()
        .expect("spawn loopctl")
}

fn history_count(root: &Path) -> usize {
    fs::read_dir(root.join(".loopctl/history"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[test]
fn build_complete_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("plan.md"), PLAN).expect("write plan");
    install_worker(
        temp.path(),
        r#"{"session_id":"cli-1","structured_output":{"status":"next","task_id":"T1","tests_passed":true,"summary":"ok"}}"#,
        0,
    );

    let output = loopctl(temp.path(), &["build", "plan.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("status=complete"));
    assert!(stdout.contains("token=cli-1"));
    assert_eq!(history_count(temp.path()), 1);

    let args = fs::read_to_string(temp.path().join("args.log")).expect("args log");
    let calls: Vec<&str> = args.lines().collect();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].contains("--resume"));
    assert!(calls[1].contains("--resume cli-1"));
    assert!(temp.path().join(".loopctl/progress.log").exists());
}

#[test]
fn improve_blocked_exits_two() {
    let temp = tempfile::tempdir().expect("tempdir");
    install_worker(
        temp.path(),
        r#"{"session_id":"cli-2","structured_output":{"status":"blocked","iteration":1,"delta":0,"metrics":{},"blockers":["need review"],"summary":"stuck"}}"#,
        0,
    );

    let output = loopctl(temp.path(), &["improve", "src/", "--max-iterations", "3"]);

    assert_eq!(output.status.code(), Some(exit_codes::BLOCKED));
    assert_eq!(history_count(temp.path()), 1);
}

#[test]
fn worker_crash_exits_failed_with_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("plan.md"), PLAN).expect("write plan");
    install_worker(temp.path(), "panic: out of tokens", 3);

    let output = loopctl(temp.path(), &["build", "plan.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert_eq!(history_count(temp.path()), 1);
    assert!(!temp.path().join(".loopctl/locks/build.lock").exists());
    let runs = fs::read_dir(temp.path().join(".loopctl/runs"))
        .expect("runs dir")
        .count();
    assert_eq!(runs, 1);
}

#[test]
fn missing_worker_binary_fails_before_anything_starts() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("plan.md"), PLAN).expect("write plan");
    fs::create_dir_all(temp.path().join(".loopctl")).expect("mkdir");
    fs::write(
        temp.path().join(".loopctl/config.toml"),
        "[worker]\ncommand = \"loopctl-no-such-worker\"\n",
    )
    .expect("write config");

    let output = loopctl(temp.path(), &["build", "plan.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("loopctl-no-such-worker"));
    assert!(!temp.path().join(".loopctl/locks").exists());
    assert_eq!(history_count(temp.path()), 0);
}

#[test]
fn non_numeric_threshold_is_a_configuration_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    install_worker(temp.path(), "{}", 0);

    let output = loopctl(temp.path(), &["improve", "src/", "--threshold", "high"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(!temp.path().join("args.log").exists());
    assert_eq!(history_count(temp.path()), 0);
}

#[test]
fn usage_errors_exit_failed_and_help_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");

    let bad = loopctl(temp.path(), &["build", "--no-such-flag"]);
    assert_eq!(bad.status.code(), Some(exit_codes::FAILED));

    let help = loopctl(temp.path(), &["--help"]);
    assert_eq!(help.status.code(), Some(exit_codes::OK));
}

#[test]
fn workdir_flag_selects_the_state_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let elsewhere = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("plan.md"), PLAN).expect("write plan");
    install_worker(
        temp.path(),
        r#"{"session_id":"cli-3","structured_output":{"status":"complete","task_id":"T1","tests_passed":true,"summary":"ok"}}"#,
        0,
    );
    let workdir = temp.path().display().to_string();

    let output = loopctl(elsewhere.path(), &["-C", &workdir, "build", "plan.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(history_count(temp.path()), 1);
    assert!(!elsewhere.path().join(".loopctl").exists());
}

#[test]
fn relative_worker_command_is_found_in_the_workdir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let elsewhere = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("plan.md"), PLAN).expect("write plan");
    install_worker(
        temp.path(),
        r#"{"session_id":"cli-4","structured_output":{"status":"complete","task_id":"T1","tests_passed":true,"summary":"ok"}}"#,
        0,
    );
    fs::write(
        temp.path().join(".loopctl/config.toml"),
        "[worker]\ncommand = \"./worker.sh\"\n",
    )
    .expect("write config");
    let workdir = temp.path().display().to_string();

    let output = loopctl(elsewhere.path(), &["-C", &workdir, "build", "plan.md"]);

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(temp.path().join("args.log").exists());
}
