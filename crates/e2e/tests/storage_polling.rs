//! Polling the persisted todo list against a scripted storage backend

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use todomvc_e2e::wait::PollPolicy;
use todomvc_e2e::{E2eError, E2eResult, LocalStorageTodos, StorageReader, TodoItem};

const KEY: &str = "react-todos";

/// Serves queued values in order, then keeps repeating the last one
struct ScriptedStorage {
    values: Mutex<VecDeque<Option<String>>>,
    reads: AtomicUsize,
}

impl ScriptedStorage {
    fn new(values: &[Option<&str>]) -> Self {
        Self {
            values: Mutex::new(values.iter().map(|v| v.map(str::to_string)).collect()),
            reads: AtomicUsize::new(0),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageReader for ScriptedStorage {
    async fn local_storage_item(&self, key: &str) -> E2eResult<Option<String>> {
        assert_eq!(key, KEY);
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut values = self.values.lock();
        if values.len() > 1 {
            Ok(values.pop_front().flatten())
        } else {
            Ok(values.front().cloned().flatten())
        }
    }
}

fn policy() -> PollPolicy {
    PollPolicy::from_millis(200, 2)
}

const TWO_ACTIVE: &str =
    r#"[{"title":"buy some cheese","completed":false},{"title":"feed the cat","completed":false}]"#;

#[tokio::test]
async fn count_waits_for_the_app_to_catch_up() {
    let storage = ScriptedStorage::new(&[
        Some("[]"),
        Some(r#"[{"title":"buy some cheese","completed":false}]"#),
        Some(TWO_ACTIVE),
    ]);
    let todos = LocalStorageTodos::new(&storage, KEY, policy());

    todos.wait_for_count(2).await.unwrap();
    assert_eq!(storage.reads(), 3);
}

#[tokio::test]
async fn missing_key_counts_as_not_yet() {
    let storage = ScriptedStorage::new(&[None, None, Some(TWO_ACTIVE)]);
    let todos = LocalStorageTodos::new(&storage, KEY, policy());

    todos.wait_for_count(2).await.unwrap();
}

#[tokio::test]
async fn unparseable_value_counts_as_not_yet() {
    let storage = ScriptedStorage::new(&[Some("{half"), Some(TWO_ACTIVE)]);
    let todos = LocalStorageTodos::new(&storage, KEY, policy());

    todos.wait_for_count(2).await.unwrap();
}

#[tokio::test]
async fn never_initialized_storage_times_out() {
    let storage = ScriptedStorage::new(&[None]);
    let todos = LocalStorageTodos::new(&storage, KEY, policy());

    let err = todos.wait_for_count(1).await.unwrap_err();
    match err {
        E2eError::Timeout { what, last_observed, .. } => {
            assert_eq!(what, "1 todos in local storage");
            assert_eq!(last_observed.as_deref(), Some("no 'react-todos' key"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(storage.reads() > 1);
}

#[tokio::test]
async fn completed_count_only_counts_flagged_items() {
    let storage = ScriptedStorage::new(&[Some(
        r#"[{"title":"a","completed":true},{"title":"b","completed":false},{"title":"c","completed":true}]"#,
    )]);
    let todos = LocalStorageTodos::new(&storage, KEY, policy());

    todos.wait_for_completed_count(2).await.unwrap();

    let err = todos.wait_for_completed_count(3).await.unwrap_err();
    assert!(err.to_string().contains("2 completed todos"), "{err}");
}

#[tokio::test]
async fn title_membership() {
    let storage = ScriptedStorage::new(&[Some(
        r#"[{"title":"buy some cheese","completed":false},{"title":"buy some sausages","completed":false}]"#,
    )]);
    let todos = LocalStorageTodos::new(&storage, KEY, policy());

    todos.wait_for_title("buy some sausages").await.unwrap();
    assert!(todos.wait_for_title("feed the cat").await.is_err());
}

#[tokio::test]
async fn exact_list_respects_order() {
    let storage = ScriptedStorage::new(&[Some(TWO_ACTIVE)]);
    let todos = LocalStorageTodos::new(&storage, KEY, policy());

    todos
        .wait_for_items(&[
            TodoItem::new("buy some cheese", false),
            TodoItem::new("feed the cat", false),
        ])
        .await
        .unwrap();

    let reversed = todos
        .wait_for_items(&[
            TodoItem::new("feed the cat", false),
            TodoItem::new("buy some cheese", false),
        ])
        .await;
    assert!(matches!(reversed, Err(E2eError::Timeout { .. })));
}

#[tokio::test]
async fn read_returns_current_list_without_waiting() {
    let storage = ScriptedStorage::new(&[Some(TWO_ACTIVE)]);
    let todos = LocalStorageTodos::new(&storage, KEY, policy());

    let items = todos.read().await.unwrap().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(storage.reads(), 1);
}

#[tokio::test]
async fn completed_flag_on_the_wrong_item_is_caught_by_the_exact_list() {
    let storage = ScriptedStorage::new(&[Some(
        r#"[{"title":"buy some cheese","completed":false},{"title":"feed the cat","completed":true}]"#,
    )]);
    let todos = LocalStorageTodos::new(&storage, KEY, policy());

    // The count alone cannot tell which row was toggled
    todos.wait_for_completed_count(1).await.unwrap();

    let err = todos
        .wait_for_items(&[
            TodoItem::new("buy some cheese", true),
            TodoItem::new("feed the cat", false),
        ])
        .await
        .unwrap_err();
    match err {
        E2eError::Timeout { last_observed, .. } => {
            let observed = last_observed.unwrap_or_default();
            assert!(observed.contains("completed: true"), "{observed}");
        }
        other => panic!("unexpected error: {other}"),
    }
}
