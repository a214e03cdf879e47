use std::sync::Arc;
use std::thread;

use teamllm::teamllm::task_list::{TaskError, TaskFilter, TaskList, TaskPatch, TaskStatus};

#[test]
fn test_create_and_get() {
    let list = TaskList::new();
    let task = list.create("Write report", "Summarize Q3 numbers");

    assert!(task.id.starts_with("task_"));
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.owner, "");

    let fetched = list.get(&task.id).unwrap();
    assert_eq!(fetched.subject, "Write report");
    assert_eq!(fetched.description, "Summarize Q3 numbers");
}

#[test]
fn test_get_unknown_task_fails() {
    let list = TaskList::new();
    let err = list.get("task_missing").unwrap_err();
    assert_eq!(err, TaskError::NotFound("task_missing".to_string()));
}

#[test]
fn test_claim_sets_owner_and_status() {
    let list = TaskList::new();
    let task = list.create("t", "");

    let claimed = list.claim(&task.id, "alice").unwrap();
    assert_eq!(claimed.status, TaskStatus::InProgress);
    assert_eq!(claimed.owner, "alice");
    assert!(claimed.updated_at >= claimed.created_at);
}

#[test]
fn test_claim_under_dependency() {
    let list = TaskList::new();
    let blocker = list.create("blocker", "");
    let dependent = list.create("dependent", "");
    list.update(
        &dependent.id,
        TaskPatch {
            blocked_by: vec![blocker.id.clone()],
            ..Default::default()
        },
    )
    .unwrap();

    // Blocked while the blocker is incomplete.
    let err = list.claim(&dependent.id, "alice").unwrap_err();
    assert_eq!(
        err,
        TaskError::Blocked {
            task_id: dependent.id.clone(),
            blocker: blocker.id.clone(),
        }
    );

    // Completing the blocker unblocks the dependent.
    list.update(
        &blocker.id,
        TaskPatch {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        },
    )
    .unwrap();

    let claimed = list.claim(&dependent.id, "alice").unwrap();
    assert_eq!(claimed.status, TaskStatus::InProgress);
    assert_eq!(claimed.owner, "alice");
}

#[test]
fn test_concurrent_claims_single_winner() {
    let list = Arc::new(TaskList::new());
    let task = list.create("contested", "");

    let mut handles = Vec::new();
    for i in 0..8 {
        let list = Arc::clone(&list);
        let id = task.id.clone();
        handles.push(thread::spawn(move || {
            list.claim(&id, format!("worker-{}", i)).is_ok()
        }));
    }

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(successes, 1);
    assert_eq!(list.get(&task.id).unwrap().status, TaskStatus::InProgress);
}

#[test]
fn test_claim_owned_task_fails() {
    let list = TaskList::new();
    let task = list.create("t", "");
    list.update(
        &task.id,
        TaskPatch {
            owner: Some("bob".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    let err = list.claim(&task.id, "alice").unwrap_err();
    assert_eq!(
        err,
        TaskError::AlreadyOwned {
            task_id: task.id.clone(),
            owner: "bob".to_string(),
        }
    );
}

#[test]
fn test_update_unknown_task_fails() {
    let list = TaskList::new();
    let err = list
        .update("task_missing", TaskPatch::default())
        .unwrap_err();
    assert_eq!(err, TaskError::NotFound("task_missing".to_string()));
}

#[test]
fn test_next_available_respects_order_and_blocking() {
    let list = TaskList::new();
    let first = list.create("first", "");
    let second = list.create("second", "");
    let third = list.create("third", "");

    // The earliest pending task wins.
    assert_eq!(list.next_available().unwrap().id, first.id);

    // Claiming it moves the cursor to the next eligible task.
    list.claim(&first.id, "alice").unwrap();
    assert_eq!(list.next_available().unwrap().id, second.id);

    // Blocking the second exposes the third.
    list.update(
        &second.id,
        TaskPatch {
            blocked_by: vec![first.id.clone()],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(list.next_available().unwrap().id, third.id);
}

#[test]
fn test_list_filters_and_excludes_deleted() {
    let list = TaskList::new();
    let a = list.create("a", "");
    let b = list.create("b", "");
    let c = list.create("c", "");

    list.claim(&a.id, "alice").unwrap();
    list.update(
        &c.id,
        TaskPatch {
            status: Some(TaskStatus::Deleted),
            ..Default::default()
        },
    )
    .unwrap();

    let all = list.list(TaskFilter::default());
    let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);

    let alices = list.list(TaskFilter {
        owner: Some("alice".to_string()),
        ..Default::default()
    });
    assert_eq!(alices.len(), 1);
    assert_eq!(alices[0].id, a.id);

    let pending = list.list(TaskFilter {
        status: Some(TaskStatus::Pending),
        ..Default::default()
    });
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, b.id);
}
