//! Improve loop scenarios run against scripted workers.

use std::fs;

use loopctl::core::types::{RunStatus, SignalKind};
use loopctl::driver::improve::ImproveLimits;
use loopctl::driver::{ImproveOptions, run_improve};
use loopctl::exit_codes;
use loopctl::io::lock::LockManager;
use loopctl::io::paths::ControllerPaths;
use loopctl::test_support::{
    RecordingNotifier, ScriptedWorker, envelope, improve_reply, services,
};
use serde_json::json;

fn options(max_iterations: &str, threshold: &str) -> ImproveOptions {
    ImproveOptions {
        scope: "src/".to_string(),
        max_iterations: Some(max_iterations.to_string()),
        threshold: Some(threshold.to_string()),
        session: None,
    }
}

/// Every iteration loops with a delta well above the threshold.
#[test]
fn exhausting_the_budget_completes_normally() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut worker = ScriptedWorker::new();
    for n in 1..=10 {
        worker = worker.reply(improve_reply(&format!("s{n}"), n, "loop", 0.2));
    }
    let services = services(temp.path(), worker, RecordingNotifier::default());

    let outcome = run_improve(&services, &options("10", "0.05")).expect("run");

    assert_eq!(services.worker.invocations(), 10);
    services.worker.assert_drained();
    assert_eq!(outcome.record.status, RunStatus::Complete);
    assert_eq!(outcome.exit_code, exit_codes::OK);
    assert_eq!(outcome.record.iterations, Some(10));
    assert_eq!(outcome.record.completed.len(), 10);
    assert_eq!(outcome.record.baseline_metrics, Some(json!({ "score": 1 })));
    assert_eq!(outcome.record.final_metrics, Some(json!({ "score": 10 })));
    assert_eq!(outcome.record.delta, Some(0.2));
    assert!(services.notifier.sent().is_empty());

    let tokens = services.worker.tokens();
    assert_eq!(tokens[0], None);
    assert_eq!(tokens[9].as_deref(), Some("s9"));
}

#[test]
fn lock_is_held_by_this_process_for_every_iteration() {
    let temp = tempfile::tempdir().expect("tempdir");
    let lock_path =
        LockManager::new(ControllerPaths::new(temp.path()).locks_dir).lock_path(SignalKind::Improve);
    let worker = ScriptedWorker::new()
        .watch_lock(&lock_path)
        .reply(improve_reply("s1", 1, "loop", 0.5))
        .reply(improve_reply("s2", 2, "error", 0.0));
    let services = services(temp.path(), worker, RecordingNotifier::default());

    let outcome = run_improve(&services, &options("5", "0.05")).expect("run");

    let pid = std::process::id().to_string();
    assert_eq!(services.worker.lock_snapshots(), vec![Some(pid); 2]);
    assert_eq!(outcome.record.status, RunStatus::Error);
    assert!(!lock_path.exists());
}

#[test]
fn blocked_iteration_stops_with_blockers() {
    let temp = tempfile::tempdir().expect("tempdir");
    let blocked = envelope(
        "s3",
        json!({
            "status": "blocked",
            "iteration": 3,
            "delta": 0.0,
            "metrics": { "score": 3 },
            "blockers": ["needs database credentials", "flaky integration suite"],
            "summary": "cannot proceed"
        }),
    );
    let worker = ScriptedWorker::new()
        .reply(improve_reply("s1", 1, "loop", 0.3))
        .reply(improve_reply("s2", 2, "loop", 0.3))
        .reply(blocked);
    let services = services(temp.path(), worker, RecordingNotifier::default());

    let outcome = run_improve(&services, &options("10", "0.05")).expect("run");

    assert_eq!(services.worker.invocations(), 3);
    assert_eq!(outcome.record.status, RunStatus::Blocked);
    assert_eq!(outcome.exit_code, exit_codes::BLOCKED);
    assert_eq!(outcome.record.iterations, Some(3));
    assert_eq!(outcome.record.blockers.len(), 2);
    assert_eq!(outcome.record.completed, vec!["item-1", "item-2"]);
    assert_eq!(outcome.record.final_metrics, Some(json!({ "score": 3 })));
    assert_eq!(services.notifier.sent().len(), 1);
}

/// The threshold wins over a worker that still wants to loop.
#[test]
fn delta_below_threshold_completes_early() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = ScriptedWorker::new()
        .reply(improve_reply("s1", 1, "loop", 0.4))
        .reply(improve_reply("s2", 2, "loop", 0.01));
    let services = services(temp.path(), worker, RecordingNotifier::default());

    let outcome = run_improve(&services, &options("10", "0.05")).expect("run");

    assert_eq!(services.worker.invocations(), 2);
    assert_eq!(outcome.record.status, RunStatus::Complete);
    assert_eq!(outcome.record.delta, Some(0.01));
    assert_eq!(outcome.record.baseline_metrics, Some(json!({ "score": 1 })));
}

#[test]
fn worker_complete_stops_successfully() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = ScriptedWorker::new().reply(improve_reply("s1", 1, "complete", 0.0));
    let services = services(temp.path(), worker, RecordingNotifier::default());

    let outcome = run_improve(&services, &options("5", "0.05")).expect("run");

    assert_eq!(outcome.record.status, RunStatus::Complete);
    assert_eq!(outcome.record.iterations, Some(1));
}

#[test]
fn worker_error_status_fails_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = ScriptedWorker::new().reply(improve_reply("s1", 1, "error", 0.0));
    let services = services(temp.path(), worker, RecordingNotifier::default());

    let outcome = run_improve(&services, &options("5", "0.05")).expect("run");

    assert_eq!(outcome.record.status, RunStatus::Error);
    assert_eq!(outcome.exit_code, exit_codes::FAILED);
}

#[test]
fn missing_payload_errors_after_one_invocation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let worker = ScriptedWorker::new()
        .reply(json!({ "session_id": "s1", "structured_output": null }).to_string())
        .reply(improve_reply("s2", 2, "loop", 0.5));
    let services = services(temp.path(), worker, RecordingNotifier::default());

    let outcome = run_improve(&services, &options("5", "0.05")).expect("run");

    assert_eq!(services.worker.invocations(), 1);
    assert_eq!(outcome.record.status, RunStatus::Error);
    assert_eq!(
        outcome.record.error.as_ref().map(|e| e.category.as_str()),
        Some("contract_missing")
    );
    assert_eq!(outcome.record.continuation_token.as_deref(), Some("s1"));
    assert!(outcome.archive.history_path.is_some());
    assert!(!services.locks.lock_path(SignalKind::Improve).exists());
}

#[test]
fn limits_come_from_config_tiers_unless_given() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join(".loopctl")).expect("mkdir");
    fs::write(
        temp.path().join(".loopctl/config.toml"),
        "[improve]\nmax_iterations = 2\nthreshold = \"0.5\"\n",
    )
    .expect("write config");
    let services = services(
        temp.path(),
        ScriptedWorker::new(),
        RecordingNotifier::default(),
    );

    let from_config = ImproveLimits::resolve(
        &services,
        &ImproveOptions {
            scope: "src/".to_string(),
            ..ImproveOptions::default()
        },
    )
    .expect("limits");
    assert_eq!(
        from_config,
        ImproveLimits {
            max_iterations: 2,
            threshold: 0.5
        }
    );

    let explicit = ImproveLimits::resolve(&services, &options("7", "0.1")).expect("limits");
    assert_eq!(explicit.max_iterations, 7);
    assert_eq!(explicit.threshold, 0.1);
}

#[test]
fn invalid_limits_are_rejected_before_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let services = services(
        temp.path(),
        ScriptedWorker::new(),
        RecordingNotifier::default(),
    );

    let err = run_improve(&services, &options("10", "a lot")).unwrap_err();
    assert!(format!("{err:#}").contains("improve.threshold"));
    assert!(run_improve(&services, &options("0", "0.05")).is_err());

    assert_eq!(services.worker.invocations(), 0);
    assert!(!temp.path().join(".loopctl/history").exists());
    assert!(!services.locks.lock_path(SignalKind::Improve).exists());
}

#[test]
fn next_focus_is_carried_into_the_following_prompt() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = envelope(
        "s1",
        json!({
            "status": "loop",
            "iteration": 1,
            "delta": 0.5,
            "metrics": {},
            "next_focus": "error handling in the parser",
            "summary": "tidied"
        }),
    );
    let worker = ScriptedWorker::new()
        .reply(first)
        .reply(improve_reply("s2", 2, "complete", 0.0));
    let services = services(temp.path(), worker, RecordingNotifier::default());

    run_improve(&services, &options("5", "0.05")).expect("run");

    let requests = services.worker.requests();
    assert!(!requests[0].prompt.contains("error handling in the parser"));
    assert!(requests[1].prompt.contains("error handling in the parser"));
    assert!(requests[1].prompt.contains("iteration 2 of 5"));
}
