use super::*;

fn sample(task_id: TaskId) -> Vec<TaskLogEntry> {
    vec![
        TaskLogEntry::new(
            task_id,
            LogLevel::Info,
            "Task started",
            TaskEvent::Status {
                status: TaskStatus::Running,
            },
        ),
        TaskLogEntry::new(
            task_id,
            LogLevel::Warn,
            "Retrying smb",
            TaskEvent::Retry {
                item: "smb".to_string(),
                attempt: 1,
                delay_ms: 2000,
                error: "Rate limited by provider".to_string(),
            },
        ),
        TaskLogEntry::new(
            task_id,
            LogLevel::Info,
            "smb done",
            TaskEvent::ItemSucceeded {
                item: "smb".to_string(),
            },
        ),
        TaskLogEntry::new(
            task_id,
            LogLevel::Info,
            "zelda skipped",
            TaskEvent::ItemSkipped {
                item: "zelda".to_string(),
                reason: "metadata already present".to_string(),
            },
        ),
        TaskLogEntry::new(
            task_id,
            LogLevel::Error,
            "metroid failed",
            TaskEvent::ItemFailed {
                item: "metroid".to_string(),
                reason: "Game not found".to_string(),
            },
        ),
        TaskLogEntry::new(
            task_id,
            LogLevel::Info,
            "Task completed",
            TaskEvent::Status {
                status: TaskStatus::Completed,
            },
        ),
    ]
}

#[test]
fn test_memory_store_keeps_order_per_task() {
    let store = TaskLogStore::in_memory();
    let a = TaskId::new();
    let b = TaskId::new();
    for entry in sample(a) {
        store.append(&entry);
    }
    store.append(&TaskLogEntry::new(b, LogLevel::Info, "other", TaskEvent::Note));

    let entries = store.read(a).unwrap();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[0].message, "Task started");
    assert_eq!(store.read(b).unwrap().len(), 1);
    assert!(store.read(TaskId::new()).unwrap().is_empty());
    assert!(store.path_for(a).is_none());
}

#[test]
fn test_disk_store_round_trips_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let store = TaskLogStore::on_disk(dir.path().join("logs")).unwrap();
    let id = TaskId::new();
    let written = sample(id);
    for entry in &written {
        store.append(entry);
    }

    let path = store.path_for(id).unwrap();
    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), written.len());
    assert!(raw.lines().next().unwrap().contains("\"type\":\"status\""));

    // a fresh store over the same directory sees the same entries
    let reopened = TaskLogStore::on_disk(dir.path().join("logs")).unwrap();
    assert_eq!(reopened.read(id).unwrap(), written);
}

#[test]
fn test_disk_store_skips_torn_line() {
    let dir = tempfile::tempdir().unwrap();
    let store = TaskLogStore::on_disk(dir.path()).unwrap();
    let id = TaskId::new();
    for entry in sample(id).into_iter().take(2) {
        store.append(&entry);
    }
    let path = store.path_for(id).unwrap();
    let mut raw = std::fs::read_to_string(&path).unwrap();
    raw.push_str("{\"task_id\":\"trunc");
    std::fs::write(&path, raw).unwrap();

    assert_eq!(store.read(id).unwrap().len(), 2);
}

#[test]
fn test_summary_and_report() {
    let id = TaskId::new();
    let entries = sample(id);
    let summary = summarize(&entries);
    assert_eq!(
        summary,
        LogSummary {
            succeeded: 1,
            skipped: 1,
            failed: 1,
            retries: 1,
            final_status: Some(TaskStatus::Completed),
        }
    );

    let mut out = Vec::new();
    write_report_to(&entries, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Status: completed"));
    assert!(text.contains("[RETRY] smb attempt 1 in 2000ms"));
    assert!(text.contains("[SKIP] zelda: metadata already present"));
    assert!(text.contains("[ERROR] metroid: Game not found"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.txt");
    write_report(&entries, &path).unwrap();
    assert!(std::fs::read_to_string(path).unwrap().starts_with("=== Task Log ==="));
}
