//! Intake-side tests: admission into the bounded queue and the intake loop.


use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mq_daemon::scheduler::{admit, Admission, IntakeLoop, JobHandle, JobQueue, JobStatus};
use test_harness::{assert_eventually, mock_job, MockJob, BEAT};

#[tokio::test]
async fn test_admitted_job_is_waiting_with_heartbeat() {
    let queue = JobQueue::with_capacity(5);
    let (job, probe) = mock_job(&["config.yaml"]);

    let admission = admit(&queue, job, BEAT).unwrap();

    assert_eq!(admission, Admission::Admitted);
    assert_eq!(probe.statuses(), vec![JobStatus::Waiting]);
    assert!(probe.heartbeat_active());
    assert_eq!(queue.len(), 1);

    assert_eventually(
        || probe.beats() >= 2,
        Duration::from_secs(1),
        "waiting job should keep beating",
    )
    .await;
}

#[tokio::test]
async fn test_sixth_job_rejected_when_queue_full() {
    let queue = JobQueue::with_capacity(5);
    let mut waiting = Vec::new();
    for _ in 0..5 {
        let (job, probe) = mock_job(&["config.yaml"]);
        assert_eq!(admit(&queue, job, BEAT).unwrap(), Admission::Admitted);
        waiting.push(probe);
    }
    assert!(queue.is_full());

    let (job, rejected) = mock_job(&["config.yaml"]);
    let start = std::time::Instant::now();
    let admission = admit(&queue, job, BEAT).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(admission, Admission::Rejected);
    assert_eq!(rejected.status(), Some(JobStatus::Error));
    assert_eq!(rejected.error().as_deref(), Some("Compute node overloaded"));
    assert!(!rejected.statuses().contains(&JobStatus::Working));
    assert!(!rejected.heartbeat_active());
    assert!(
        elapsed < Duration::from_millis(200),
        "admission must not block (took {:?})",
        elapsed
    );

    // The jobs already waiting are untouched.
    assert_eq!(queue.len(), 5);
    for probe in &waiting {
        assert_eq!(probe.status(), Some(JobStatus::Waiting));
        assert!(probe.heartbeat_active());
    }
}

#[tokio::test]
async fn test_admission_resumes_after_withdrawal() {
    let queue = JobQueue::with_capacity(1);
    let (first, _) = mock_job(&[]);
    let (second, second_probe) = mock_job(&[]);
    let (third, third_probe) = mock_job(&[]);

    assert_eq!(admit(&queue, first, BEAT).unwrap(), Admission::Admitted);
    assert_eq!(admit(&queue, second, BEAT).unwrap(), Admission::Rejected);
    assert_eq!(second_probe.status(), Some(JobStatus::Error));

    let _taken = queue.withdraw().await.unwrap();
    assert_eq!(admit(&queue, third, BEAT).unwrap(), Admission::Admitted);
    assert_eq!(third_probe.status(), Some(JobStatus::Waiting));
}

#[tokio::test]
async fn test_intake_loop_preserves_stream_order() {
    let queue: JobQueue<MockJob> = JobQueue::with_capacity(5);
    let (tx, rx) = mpsc::unbounded_channel();

    let mut ids = Vec::new();
    for _ in 0..4 {
        let (job, probe) = mock_job(&["config.yaml"]);
        ids.push(probe.id);
        tx.send(job).unwrap();
    }
    drop(tx);

    IntakeLoop::new(rx, queue.clone(), BEAT)
        .run(CancellationToken::new())
        .await;

    let mut dequeued = Vec::new();
    while let Some(job) = queue.try_withdraw() {
        dequeued.push(job.id());
    }
    assert_eq!(dequeued, ids);
}

#[tokio::test]
async fn test_intake_loop_survives_failing_job() {
    let queue: JobQueue<MockJob> = JobQueue::with_capacity(5);
    let (tx, rx) = mpsc::unbounded_channel();

    let (broken, broken_probe) = mock_job(&["config.yaml"]);
    let (healthy, healthy_probe) = mock_job(&["config.yaml"]);
    tx.send(broken.failing_on(JobStatus::Waiting)).unwrap();
    tx.send(healthy).unwrap();
    drop(tx);

    IntakeLoop::new(rx, queue.clone(), BEAT)
        .run(CancellationToken::new())
        .await;

    // The failing job never made it into the queue; the next one did.
    assert!(!broken_probe.heartbeat_active());
    assert_eq!(healthy_probe.status(), Some(JobStatus::Waiting));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.try_withdraw().map(|j| j.id()), Some(healthy_probe.id));
}

#[tokio::test]
async fn test_intake_loop_rejects_overflow_and_keeps_going() {
    let queue: JobQueue<MockJob> = JobQueue::with_capacity(2);
    let (tx, rx) = mpsc::unbounded_channel();

    let mut probes = Vec::new();
    for _ in 0..4 {
        let (job, probe) = mock_job(&["config.yaml"]);
        probes.push(probe);
        tx.send(job).unwrap();
    }
    drop(tx);

    IntakeLoop::new(rx, queue.clone(), BEAT)
        .run(CancellationToken::new())
        .await;

    let statuses: Vec<_> = probes.iter().map(|p| p.status()).collect();
    assert_eq!(
        statuses,
        vec![
            Some(JobStatus::Waiting),
            Some(JobStatus::Waiting),
            Some(JobStatus::Error),
            Some(JobStatus::Error),
        ]
    );
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn test_intake_loop_stops_on_shutdown() {
    let queue: JobQueue<MockJob> = JobQueue::with_capacity(2);
    let (tx, rx) = mpsc::unbounded_channel::<MockJob>();
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(IntakeLoop::new(rx, queue, BEAT).run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("intake loop should stop after shutdown")
        .unwrap();
    drop(tx);
}
