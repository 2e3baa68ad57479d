//! End-to-end tests: a running daemon fed by a job source.


use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mq_daemon::scheduler::JobStatus;
use mq_daemon::source::{read_request, submit_request, DirectoryListener};
use mq_daemon::worker::AnalysisExecutor;
use mq_daemon::{Daemon, DaemonConfig, DaemonError};
use test_harness::{assert_eventually, mock_job, wait_for, Behavior, MockExecutor};

fn fast_config(listen_dir: impl Into<PathBuf>) -> DaemonConfig {
    let mut config = DaemonConfig::new(listen_dir, "sh").with_heartbeat_interval_ms(10);
    config.listener.poll_interval_ms = 10;
    config
}

#[tokio::test]
async fn test_daemon_rejects_invalid_config() {
    let config = fast_config(".").with_workers(0);
    let err = Daemon::from_config(config).err().expect("zero workers is invalid");
    assert!(matches!(err, DaemonError::Config(_)));
}

#[tokio::test]
async fn test_daemon_overflow_with_slow_workers() {
    let executor = MockExecutor::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut probes = Vec::new();
    for _ in 0..8 {
        let (job, probe) = mock_job(&["config.yaml"]);
        executor.on(probe.id, Behavior::Sleep(Duration::from_millis(200)));
        probes.push(probe);
        tx.send(job).unwrap();
    }

    // One slot and one worker: the first job is taken by the worker, the
    // second waits, everything after that is turned away.
    let config = fast_config(".").with_queue_capacity(1).with_workers(1);
    let daemon = Daemon::new(config, rx, executor.clone()).unwrap();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(daemon.run(shutdown.clone()));

    assert_eventually(
        || probes.iter().all(|p| p.status().is_some_and(|s| s.is_terminal())),
        Duration::from_secs(5),
        "every job should finish or be rejected",
    )
    .await;

    let rejected = probes
        .iter()
        .filter(|p| p.error().as_deref() == Some("Compute node overloaded"))
        .count();
    let succeeded = probes
        .iter()
        .filter(|p| p.status() == Some(JobStatus::Success))
        .count();
    assert!(succeeded >= 1);
    assert_eq!(succeeded + rejected, probes.len());
    assert_eq!(executor.calls().len(), succeeded);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("daemon should stop after shutdown")
        .unwrap()
        .unwrap();
    drop(tx);
}

#[tokio::test]
async fn test_daemon_processes_request_directories() {
    let listen = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let raw = staging.path().join("sampleA.raw");
    let params = staging.path().join("config.yaml");
    std::fs::write(&raw, "spectra").unwrap();
    std::fs::write(&params, "threads: 1\n").unwrap();

    let mut config = fast_config(listen.path());
    config.tool.args = vec![
        "-c".to_string(),
        r#"sleep 0.05; cd "$(dirname "$1")" && echo quant > proteinGroups.txt"#.to_string(),
        "tool".to_string(),
    ];
    let listener = DirectoryListener::new(&config.listener).unwrap();
    let executor = AnalysisExecutor::new(config.tool.clone());
    let daemon = Daemon::new(config, listener, executor).unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(daemon.run(shutdown.clone()));

    let good = submit_request(listen.path(), None, &[raw.clone(), params.clone()])
        .await
        .unwrap();
    let bad = submit_request(listen.path(), Some("input_noparams".to_string()), &[raw])
        .await
        .unwrap();

    let finished = wait_for(
        || {
            [&good, &bad].iter().all(|dir| {
                std::fs::read_to_string(dir.join("status"))
                    .map(|s| s == "SUCCESS" || s == "ERROR")
                    .unwrap_or(false)
            })
        },
        Duration::from_secs(10),
        Duration::from_millis(20),
    )
    .await;
    assert!(finished, "both requests should reach a terminal status");

    let report = read_request(&good).await.unwrap();
    assert_eq!(report.status, Some(JobStatus::Success));
    assert_eq!(report.outputs, vec![good.join("output/proteinGroups.txt")]);
    assert!(report.last_beat.is_some());
    assert!(report.error.is_none());

    let report = read_request(&bad).await.unwrap();
    assert_eq!(report.status, Some(JobStatus::Error));
    assert_eq!(report.error.as_deref(), Some("No parameter file"));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("daemon should stop after shutdown")
        .unwrap()
        .unwrap();
}
