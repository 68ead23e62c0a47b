use super::*;

fn spec(games: &[&str]) -> TaskSpec {
    TaskSpec::new(
        TaskKind::MetadataScrape,
        ProviderId::ScreenScraper,
        TaskScope::new("nes", games.iter().copied()),
    )
}

fn new_task(
    games: &[&str],
) -> (
    Arc<Task>,
    mpsc::UnboundedReceiver<ProgressEvent>,
    Arc<TaskLogStore>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let log = Arc::new(TaskLogStore::in_memory());
    let task = Task::with_id(TaskId::new(), spec(games), tx, log.clone());
    (task, rx, log)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_state_machine() {
    use TaskStatus::*;
    let all = [Queued, Running, Cancelling, Cancelled, Completed, Failed];
    let allowed = [
        (Queued, Running),
        (Queued, Cancelled),
        (Running, Completed),
        (Running, Failed),
        (Running, Cancelled),
        (Running, Cancelling),
        (Cancelling, Cancelled),
    ];
    for from in all {
        for to in all {
            assert_eq!(
                from.can_transition_to(to),
                allowed.contains(&(from, to)),
                "{} -> {}",
                from,
                to
            );
        }
        // nothing re-enters Queued, nothing leaves a terminal state
        assert!(!from.can_transition_to(Queued));
        if from.is_terminal() {
            assert!(all.iter().all(|&to| !from.can_transition_to(to)));
        }
    }
}

#[test]
fn test_parse_ids_and_kinds() {
    let id = TaskId::new();
    assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
    assert!("not-a-uuid".parse::<TaskId>().is_err());
    assert_eq!("images".parse::<TaskKind>(), Ok(TaskKind::ImageDownload));
    assert_eq!("metadata-scrape".parse::<TaskKind>(), Ok(TaskKind::MetadataScrape));
    assert!("boxart".parse::<TaskKind>().is_err());
}

#[test]
fn test_media_selection() {
    let defaults = TaskOptions::default();
    assert_eq!(
        defaults.media_for(TaskKind::ImageDownload),
        vec![MediaKind::Cover, MediaKind::Screenshot, MediaKind::Marquee]
    );
    assert_eq!(defaults.media_for(TaskKind::VideoDownload), vec![MediaKind::Video]);

    let picked = TaskOptions {
        overwrite_existing: false,
        media: vec![MediaKind::Fanart, MediaKind::Video, MediaKind::Miximage],
    };
    assert_eq!(picked.media_for(TaskKind::ImageDownload), vec![MediaKind::Fanart]);
    assert!(picked.media_for(TaskKind::MetadataScrape).is_empty());
}

#[test]
fn test_submission_is_logged_and_announced() {
    let (task, mut rx, log) = new_task(&["a", "b"]);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, TaskStatus::Queued);
    assert_eq!(events[0].total, 2);

    let entries = log.read(task.id).unwrap();
    assert_eq!(
        entries[0].event,
        TaskEvent::Status {
            status: TaskStatus::Queued
        }
    );
    let snapshot = task.snapshot();
    assert!(snapshot.started_at.is_none());
    assert!(snapshot.finished_at.is_none());
}

#[test]
fn test_outcomes_update_progress_and_complete() {
    let (task, mut rx, _log) = new_task(&["a", "b", "c"]);
    assert!(task.transition(TaskStatus::Running, "started"));
    task.record_outcome("a", ItemOutcome::Succeeded("ok".to_string()));
    task.record_outcome("b", ItemOutcome::Skipped("already scraped".to_string()));
    task.record_outcome("c", ItemOutcome::Failed("not found".to_string()));

    let snapshot = task.snapshot();
    assert_eq!(snapshot.progress.completed, 2);
    assert_eq!(snapshot.progress.failed, 1);
    assert_eq!(snapshot.failed_items, vec!["c".to_string()]);

    // extra outcomes never push past total
    task.record_outcome("c", ItemOutcome::Failed("again".to_string()));
    assert_eq!(task.snapshot().progress.failed, 1);

    assert_eq!(task.finish(), TaskStatus::Completed);
    let snapshot = task.snapshot();
    assert!(snapshot.finished_at.is_some());
    assert!(snapshot.failure.is_none());

    let events = drain(&mut rx);
    // queued, running, three items, completed
    assert_eq!(events.len(), 6);
    for event in &events {
        assert!(event.completed + event.failed <= event.total);
    }
    let processed: Vec<usize> = events.iter().map(|e| e.completed + e.failed).collect();
    assert!(processed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(events.last().unwrap().status, TaskStatus::Completed);
}

#[test]
fn test_fatal_item_fails_task_and_keeps_counts() {
    let (task, _rx, _log) = new_task(&["a", "b", "c", "d"]);
    task.transition(TaskStatus::Running, "started");
    task.record_outcome("a", ItemOutcome::Succeeded("ok".to_string()));
    task.record_outcome(
        "b",
        ItemOutcome::Fatal(TaskFailure::new(FailureCode::AuthRejected, "bad password")),
    );
    assert!(task.should_stop());

    assert_eq!(task.finish(), TaskStatus::Failed);
    let snapshot = task.snapshot();
    assert_eq!(snapshot.progress.completed, 1);
    assert_eq!(snapshot.progress.failed, 1);
    assert_eq!(snapshot.failure.unwrap().code, FailureCode::AuthRejected);
}

#[test]
fn test_cancel_paths() {
    let (queued, _rx, _log) = new_task(&["a"]);
    assert_eq!(queued.request_cancel(), TaskStatus::Cancelled);
    assert_eq!(queued.request_cancel(), TaskStatus::Cancelled);
    // a cancelled task can no longer start
    assert!(!queued.transition(TaskStatus::Running, "late start"));

    let (running, _rx, log) = new_task(&["a", "b", "c"]);
    running.transition(TaskStatus::Running, "started");
    running.record_outcome("a", ItemOutcome::Succeeded("ok".to_string()));
    assert_eq!(running.request_cancel(), TaskStatus::Cancelling);
    assert!(running.should_stop());
    assert_eq!(running.request_cancel(), TaskStatus::Cancelling);

    // an in-flight item still lands while cancelling
    running.record_outcome("b", ItemOutcome::Succeeded("ok".to_string()));
    assert_eq!(running.finish(), TaskStatus::Cancelled);
    let snapshot = running.snapshot();
    assert_eq!(snapshot.progress.completed, 2);
    assert_eq!(snapshot.progress.total, 3);

    let last = log.read(running.id).unwrap().pop().unwrap();
    assert!(last.message.contains("1 of 3 items left unprocessed"));
}

#[test]
fn test_cancelling_wins_over_fatal() {
    let (task, _rx, _log) = new_task(&["a", "b"]);
    task.transition(TaskStatus::Running, "started");
    task.request_cancel();
    let status = task.fail(TaskFailure::new(FailureCode::QuotaExceeded, "quota"));
    assert_eq!(status, TaskStatus::Cancelled);
}

#[test]
fn test_abort_internal_marks_failed() {
    let (task, _rx, _log) = new_task(&["a"]);
    task.transition(TaskStatus::Running, "started");
    task.abort_internal("runner panicked");
    let snapshot = task.snapshot();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.failure.unwrap().code, FailureCode::Internal);

    // no effect once terminal
    task.abort_internal("again");
    assert_eq!(task.status(), TaskStatus::Failed);
}

#[test]
fn test_retry_entries_are_logged() {
    let (task, mut rx, log) = new_task(&["a"]);
    task.transition(TaskStatus::Running, "started");
    let before = drain(&mut rx).len();
    let error = ProviderError::RateLimited;
    task.log_retry(
        "a",
        &RetryNotice {
            attempt: 1,
            error: &error,
            delay: std::time::Duration::from_secs(2),
        },
    );
    // retries are log-only
    assert_eq!(drain(&mut rx).len(), 0);
    assert_eq!(before, 2);

    let retry = log
        .read(task.id)
        .unwrap()
        .into_iter()
        .find(|e| matches!(e.event, TaskEvent::Retry { .. }))
        .unwrap();
    assert_eq!(
        retry.event,
        TaskEvent::Retry {
            item: "a".to_string(),
            attempt: 1,
            delay_ms: 2000,
            error: "Rate limited by provider".to_string(),
        }
    );
}

#[tokio::test]
async fn test_wait_terminal_resolves() {
    let (task, _rx, _log) = new_task(&["a"]);
    let waiter = {
        let task = task.clone();
        tokio::spawn(async move { task.wait_terminal().await })
    };
    task.request_cancel();
    waiter.await.unwrap();
    // already terminal resolves immediately
    task.wait_terminal().await;
}

#[test]
fn test_retry_scope_covers_failed_and_unreached() {
    let (task, _rx, _log) = new_task(&["a", "b", "c", "d"]);
    task.transition(TaskStatus::Running, "started");
    task.record_outcome("b", ItemOutcome::Failed("not found".to_string()));
    task.record_outcome("a", ItemOutcome::Skipped("present".to_string()));
    task.request_cancel();
    task.finish();
    assert_eq!(task.retry_scope(), vec!["b", "c", "d"]);
}
