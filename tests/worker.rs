mod common;

use std::time::{Duration, Instant};

use common::{eventually, memory_queue, purchase, FileStore, MockConnector, Outcome, ScriptedRenderer};
use receipt_spooler::{JobQueue, JobStatus, RenderGate, RetryScheduler, Worker};
use tokio_util::sync::CancellationToken;

fn worker(queue: &JobQueue, connector: MockConnector, renderer: ScriptedRenderer) -> Worker<MockConnector, ScriptedRenderer> {
    let gate = RenderGate::new(connector, renderer, Duration::from_secs(1));
    Worker::new(queue.clone(), gate).with_error_pause(Duration::from_millis(10))
}

#[tokio::test]
async fn two_connect_errors_then_success_completes() {
    let queue = memory_queue(5, Duration::from_millis(1)).await;
    let id = queue.enqueue(purchase(62)).await.unwrap();
    let renderer = ScriptedRenderer::always(Outcome::Print);
    let mut worker = worker(&queue, MockConnector::failing(2), renderer.clone());

    let job = queue.next_eligible().await.unwrap().unwrap();
    let status = worker.process(job, &CancellationToken::new()).await;

    assert_eq!(status, JobStatus::Completed);
    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);
    assert!(job.completed_at.is_some());
    assert_eq!(renderer.printed().len(), 1);
}

#[tokio::test]
async fn always_failing_job_is_parked_after_max_attempts() {
    let queue = memory_queue(3, Duration::from_millis(1)).await;
    let id = queue.enqueue(purchase(7)).await.unwrap();
    let connector = MockConnector::failing(0);
    let mut worker = worker(&queue, connector.clone(), ScriptedRenderer::always(Outcome::Fail));

    let job = queue.next_eligible().await.unwrap().unwrap();
    let status = worker.process(job, &CancellationToken::new()).await;

    assert_eq!(status, JobStatus::Failed);
    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert!(job.last_error.as_deref().unwrap_or_default().contains("paper jam"));
    assert!(job.last_attempt_at.is_some());
    // Each failure dropped the handle, so every attempt reconnected.
    assert_eq!(connector.connects(), 3);
    assert!(queue.next_eligible().await.unwrap().is_none());
}

#[tokio::test]
async fn retries_back_off_exponentially() {
    let queue = memory_queue(3, Duration::from_millis(40)).await;
    queue.enqueue(purchase(1)).await.unwrap();
    let mut worker = worker(&queue, MockConnector::failing(0), ScriptedRenderer::always(Outcome::Fail));

    let job = queue.next_eligible().await.unwrap().unwrap();
    let started = Instant::now();
    worker.process(job, &CancellationToken::new()).await;

    // 40ms before the 2nd attempt, 80ms before the 3rd, none after the last.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(120), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
}

#[tokio::test]
async fn recovery_drains_jobs_left_by_previous_run() {
    let store = FileStore::new();
    let retry = RetryScheduler::new(3, Duration::from_millis(1));

    let (queue, storage) = store.open(retry).await;
    let first = queue.enqueue(purchase(1)).await.unwrap();
    let second = queue.enqueue(purchase(2)).await.unwrap();
    storage.pool.close().await;

    let (queue, _storage) = store.open(retry).await;
    let renderer = ScriptedRenderer::always(Outcome::Print);
    let mut worker = worker(&queue, MockConnector::failing(0), renderer.clone());

    let processed = worker.recover(&CancellationToken::new()).await;

    assert_eq!(processed, 2);
    for id in [first, second] {
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Completed);
    }
    let printed: Vec<_> = renderer.printed().into_iter().map(|(_, p)| p["id"].clone()).collect();
    assert_eq!(printed, vec![1, 2]);
}

#[tokio::test]
async fn restarted_job_only_gets_its_remaining_attempts() {
    let store = FileStore::new();
    let retry = RetryScheduler::new(3, Duration::from_millis(1));

    let (queue, storage) = store.open(retry).await;
    let id = queue.enqueue(purchase(4)).await.unwrap();
    queue.fail_retry(id, "offline").await.unwrap();
    queue.fail_retry(id, "offline").await.unwrap();
    storage.pool.close().await;

    let (queue, _storage) = store.open(retry).await;
    let connector = MockConnector::failing(0);
    let mut worker = worker(&queue, connector.clone(), ScriptedRenderer::always(Outcome::Fail));

    assert_eq!(worker.recover(&CancellationToken::new()).await, 1);

    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn lowered_budget_parks_over_budget_jobs_for_replay() {
    let store = FileStore::new();

    let (queue, storage) = store.open(RetryScheduler::new(5, Duration::ZERO)).await;
    let id = queue.enqueue(purchase(8)).await.unwrap();
    for _ in 0..3 {
        queue.fail_retry(id, "offline").await.unwrap();
    }
    storage.pool.close().await;

    let (queue, _storage) = store.open(RetryScheduler::new(3, Duration::ZERO)).await;
    let renderer = ScriptedRenderer::always(Outcome::Print);
    let mut worker = worker(&queue, MockConnector::failing(0), renderer.clone());

    assert_eq!(worker.recover(&CancellationToken::new()).await, 0);
    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);

    assert!(queue.replay(id).await.unwrap());
    assert_eq!(worker.recover(&CancellationToken::new()).await, 1);
    assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Completed);
    assert_eq!(renderer.printed().len(), 1);
}

#[tokio::test]
async fn run_prints_leftovers_before_jobs_enqueued_after_start() {
    let store = FileStore::new();
    let retry = RetryScheduler::new(3, Duration::from_millis(1));

    let (queue, storage) = store.open(retry).await;
    queue.enqueue(purchase(1)).await.unwrap();
    queue.enqueue(purchase(2)).await.unwrap();
    storage.pool.close().await;

    let (queue, _storage) = store.open(retry).await;
    let renderer = ScriptedRenderer::always(Outcome::Print);
    let worker = worker(&queue, MockConnector::failing(0), renderer.clone()).with_poll_interval(Duration::from_secs(60));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));
    let late = queue.enqueue(purchase(3)).await.unwrap();

    let done = eventually(Duration::from_secs(5), || {
        let queue = queue.clone();
        async move { queue.get(late).await.unwrap().unwrap().status == JobStatus::Completed }
    })
    .await;
    assert!(done);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

    let printed: Vec<_> = renderer.printed().into_iter().map(|(_, p)| p["id"].clone()).collect();
    assert_eq!(printed, vec![1, 2, 3]);
}

#[tokio::test]
async fn run_loop_prints_new_jobs_and_stops_on_shutdown() {
    let queue = memory_queue(3, Duration::from_millis(1)).await;
    let renderer = ScriptedRenderer::always(Outcome::Print);
    // Long poll interval: only the enqueue wakeup can get the job printed in time.
    let worker = worker(&queue, MockConnector::failing(0), renderer.clone()).with_poll_interval(Duration::from_secs(60));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let id = queue.enqueue(purchase(5)).await.unwrap();

    let done = eventually(Duration::from_secs(5), || {
        let queue = queue.clone();
        async move { queue.get(id).await.unwrap().unwrap().status == JobStatus::Completed }
    })
    .await;
    assert!(done);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert_eq!(renderer.printed().len(), 1);
}

#[tokio::test]
async fn shutdown_during_backoff_leaves_job_pending() {
    let queue = memory_queue(5, Duration::from_secs(60)).await;
    let id = queue.enqueue(purchase(9)).await.unwrap();
    let worker = worker(&queue, MockConnector::failing(0), ScriptedRenderer::always(Outcome::Fail));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let attempted = eventually(Duration::from_secs(5), || {
        let queue = queue.clone();
        async move { queue.get(id).await.unwrap().unwrap().attempts == 1 }
    })
    .await;
    assert!(attempted);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

    let job = queue.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
}
