//! Scheduler behaviour under a scripted runner and paused time.

use super::*;
use crate::events::CollectingEventSink;
use crate::testing::{
    assert_job_failed, assert_job_succeeded, assert_job_timed_out, fatal_failure, transient_failure,
    ScriptedRunner,
};
use futures::future::join_all;
use pretty_assertions::assert_eq;

fn config(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig::new()
        .with_max_concurrent(max_concurrent)
        .with_submission_timeout(Duration::from_secs(60))
}

fn scheduler(
    runner: &Arc<ScriptedRunner>,
    config: SchedulerConfig,
) -> (Scheduler, Arc<CollectingEventSink>) {
    let events = Arc::new(CollectingEventSink::new());
    let scheduler = Scheduler::builder(runner.clone())
        .with_config(config)
        .with_retry_policy(RetryPolicy::new().with_base_delay(Duration::from_millis(100)))
        .with_event_sink(events.clone())
        .build();
    (scheduler, events)
}

#[tokio::test(start_paused = true)]
async fn test_submit_and_complete() {
    let runner = Arc::new(ScriptedRunner::new());
    let (scheduler, events) = scheduler(&runner, config(2));

    let response = scheduler.submit("a").unwrap().await;
    let result = assert_job_succeeded(&response);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.job_id.as_str(), "a");

    assert!(scheduler.status().is_idle());
    assert_eq!(
        events.types_for("a"),
        vec!["job.submitted", "job.dispatched", "job.completed"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_id_rejected() {
    let runner = Arc::new(ScriptedRunner::new());
    let (scheduler, events) = scheduler(&runner, config(2));

    assert_eq!(scheduler.submit("").unwrap_err(), SubmitError::InvalidJobId);
    assert_eq!(events.count("job.rejected"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_rejected_until_resolved() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(100)));
    let (scheduler, events) = scheduler(&runner, config(2));

    let first = scheduler.submit("a").unwrap();
    assert_eq!(
        scheduler.submit("a").unwrap_err(),
        SubmitError::Duplicate(JobId::new("a"))
    );
    assert_job_succeeded(&first.await);

    // Once resolved the id can be submitted again.
    let second = scheduler.submit("a").unwrap();
    assert_job_succeeded(&second.await);

    assert_eq!(runner.calls("a"), 2);
    assert_eq!(events.count("job.rejected"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_concurrency() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(50)));
    let (scheduler, _) = scheduler(&runner, config(2));

    let receivers: Vec<_> = (0..6)
        .map(|i| scheduler.submit(format!("job-{i}")).unwrap())
        .collect();
    assert_eq!(scheduler.status().in_flight_count, 2);
    assert_eq!(scheduler.status().queue_length, 4);

    for response in join_all(receivers).await {
        assert_job_succeeded(&response);
    }

    assert_eq!(runner.total_calls(), 6);
    assert_eq!(runner.peak_concurrency(), 2);
    assert!(scheduler.status().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_two_transient_failures_then_success() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.script("a", vec![transient_failure(), transient_failure()]);
    let (scheduler, events) = scheduler(&runner, config(2));

    let response = scheduler.submit("a").unwrap().await;
    assert_eq!(assert_job_succeeded(&response).attempts, 3);

    assert_eq!(runner.calls("a"), 3);
    assert_eq!(events.count("job.retry_scheduled"), 2);
    assert!(scheduler.status().retry_attempts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.set_fallback(transient_failure());
    let (scheduler, events) = scheduler(&runner, config(2));

    let response = scheduler.submit("a").unwrap().await;
    assert_job_failed(&response, 3);

    assert_eq!(runner.calls("a"), 3);
    assert_eq!(events.count("job.failed"), 1);
    assert!(scheduler.status().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failure_not_retried() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.script("a", vec![fatal_failure()]);
    let (scheduler, _) = scheduler(&runner, config(2));

    assert_job_failed(&scheduler.submit("a").unwrap().await, 1);
    assert_eq!(runner.calls("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_while_running_detaches() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_secs(1)));
    let config = config(2).with_submission_timeout(Duration::from_millis(100));
    let (scheduler, events) = scheduler(&runner, config);

    let response = scheduler.submit("a").unwrap().await;
    assert_job_timed_out(&response);
    assert_eq!(response.unwrap_err().timed_out_stage(), None);

    let status = scheduler.status();
    assert_eq!(status.in_flight_count, 1);
    assert_eq!(status.detached_count, 1);
    assert!(matches!(
        scheduler.submit("a"),
        Err(SubmitError::Duplicate(_))
    ));

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(scheduler.status().is_idle());
    assert_eq!(runner.calls("a"), 1);
    assert_eq!(events.count("job.timed_out"), 1);
    assert_eq!(events.count("job.discarded"), 1);
    assert_eq!(events.count("job.completed"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_while_queued_never_runs() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_secs(1)));
    let config = config(1).with_submission_timeout(Duration::from_millis(150));
    let (scheduler, _) = scheduler(&runner, config);

    let _a = scheduler.submit("a").unwrap();
    let b = scheduler.submit("b").unwrap();
    assert_job_timed_out(&b.await);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(runner.calls("a"), 1);
    assert_eq!(runner.calls("b"), 0);
    assert!(scheduler.status().is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_panic_becomes_fatal_failure() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.panic_on("boom");
    let (scheduler, _) = scheduler(&runner, config(1));

    let response = scheduler.submit("boom").unwrap().await;
    match &response {
        Err(JobError::Failed { reason, attempts }) => {
            assert_eq!(*attempts, 1);
            assert!(reason.contains("panicked"));
        }
        other => panic!("unexpected response: {other:?}"),
    }

    // The slot was released.
    assert_job_succeeded(&scheduler.submit("ok").unwrap().await);
    assert_eq!(runner.running(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_queued_and_running() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_secs(1)));
    let (scheduler, events) = scheduler(&runner, config(1));

    let a = scheduler.submit("a").unwrap();
    let b = scheduler.submit("b").unwrap();

    assert!(scheduler.cancel(&JobId::new("b")));
    assert!(scheduler.cancel(&JobId::new("a")));
    assert!(!scheduler.cancel(&JobId::new("a")));
    assert!(!scheduler.cancel(&JobId::new("missing")));

    assert_eq!(a.await, Err(JobError::Cancelled));
    assert_eq!(b.await, Err(JobError::Cancelled));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(scheduler.status().is_idle());
    assert_eq!(runner.calls("b"), 0);
    assert_eq!(events.count("job.cancelled"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_pending_and_rejects_new() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_secs(1)));
    let (scheduler, events) = scheduler(&runner, config(1));
    let handle = scheduler.spawn();

    let a = scheduler.submit("a").unwrap();
    let b = scheduler.submit("b").unwrap();
    scheduler.shutdown();

    assert!(matches!(a.await, Err(JobError::Abandoned { .. })));
    assert!(matches!(b.await, Err(JobError::Abandoned { .. })));
    assert_eq!(
        scheduler.submit("c").unwrap_err(),
        SubmitError::ShuttingDown
    );
    assert!(scheduler.is_shutting_down());

    handle.await.unwrap();
    assert_eq!(events.count("job.abandoned"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_callback_delivery() {
    let runner = Arc::new(ScriptedRunner::new());
    let (scheduler, _) = scheduler(&runner, config(1));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    scheduler
        .submit_with("a", Delivery::from_fn(move |response| {
            let _ = tx.send(response);
        }))
        .unwrap();

    let response = rx.recv().await.unwrap();
    assert_job_succeeded(&response);
    // The callback was consumed, so the channel closes.
    assert!(rx.recv().await.is_none());
}

#[test]
fn test_panic_message_extraction() {
    let payload: Box<dyn Any + Send> = Box::new("static message");
    assert_eq!(panic_message(payload.as_ref()), "static message");

    let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
    assert_eq!(panic_message(payload.as_ref()), "owned message");

    let payload: Box<dyn Any + Send> = Box::new(42_u8);
    assert_eq!(panic_message(payload.as_ref()), "unknown panic");
}
