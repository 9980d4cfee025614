//! The to-do list as the application persists it in `localStorage`
//!
//! The app serializes its whole list as one JSON array under a single key.
//! Checks against it poll until they hold, since the app writes storage
//! asynchronously after each UI interaction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;
use crate::wait::{poll_until, PollPolicy, Probe};

/// Storage key the reference app writes its list under
pub const DEFAULT_STORAGE_KEY: &str = "react-todos";

/// One persisted to-do entry. Extra fields written by the app are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub title: String,
    pub completed: bool,
}

impl TodoItem {
    pub fn new(title: impl Into<String>, completed: bool) -> Self {
        Self {
            title: title.into(),
            completed,
        }
    }
}

/// Anything that can read a raw `localStorage` value
#[async_trait]
pub trait StorageReader: Send + Sync {
    /// Raw value stored under `key`, or `None` when the key is absent
    async fn local_storage_item(&self, key: &str) -> E2eResult<Option<String>>;
}

/// Parse the persisted list. An absent key yields `Ok(None)`.
pub fn parse_todos(raw: Option<&str>) -> E2eResult<Option<Vec<TodoItem>>> {
    match raw {
        None => Ok(None),
        Some(json) => Ok(Some(serde_json::from_str(json)?)),
    }
}

/// Polling view over the persisted list
pub struct LocalStorageTodos<'a> {
    reader: &'a dyn StorageReader,
    key: &'a str,
    policy: PollPolicy,
}

impl<'a> LocalStorageTodos<'a> {
    pub fn new(reader: &'a dyn StorageReader, key: &'a str, policy: PollPolicy) -> Self {
        Self { reader, key, policy }
    }

    /// Current persisted list, without waiting
    pub async fn read(&self) -> E2eResult<Option<Vec<TodoItem>>> {
        let raw = self.reader.local_storage_item(self.key).await?;
        parse_todos(raw.as_deref())
    }

    /// Wait until the list holds exactly `expected` items
    pub async fn wait_for_count(&self, expected: usize) -> E2eResult<()> {
        self.wait_for(&format!("{} todos in local storage", expected), |items| {
            if items.len() == expected {
                Ok(())
            } else {
                Err(format!("{} todos", items.len()))
            }
        })
        .await
    }

    /// Wait until exactly `expected` items are flagged completed
    pub async fn wait_for_completed_count(&self, expected: usize) -> E2eResult<()> {
        self.wait_for(
            &format!("{} completed todos in local storage", expected),
            |items| {
                let completed = items.iter().filter(|item| item.completed).count();
                if completed == expected {
                    Ok(())
                } else {
                    Err(format!("{} completed todos", completed))
                }
            },
        )
        .await
    }

    /// Wait until some item carries `title`
    pub async fn wait_for_title(&self, title: &str) -> E2eResult<()> {
        self.wait_for(&format!("'{}' in local storage", title), |items| {
            if items.iter().any(|item| item.title == title) {
                Ok(())
            } else {
                let titles: Vec<&str> = items.iter().map(|item| item.title.as_str()).collect();
                Err(format!("titles {:?}", titles))
            }
        })
        .await
    }

    /// Wait until the list equals `expected`, order included
    pub async fn wait_for_items(&self, expected: &[TodoItem]) -> E2eResult<()> {
        self.wait_for(&format!("local storage == {:?}", expected), |items| {
            if items == expected {
                Ok(())
            } else {
                Err(format!("{:?}", items))
            }
        })
        .await
    }

    /// Absent or unparseable storage is treated as "not yet", never as failure.
    async fn wait_for<F>(&self, what: &str, check: F) -> E2eResult<()>
    where
        F: Fn(&[TodoItem]) -> Result<(), String>,
    {
        let this = self;
        let check = &check;

        poll_until(what, &self.policy, move || async move {
            let raw = this.reader.local_storage_item(this.key).await?;
            let probe = match parse_todos(raw.as_deref()) {
                Ok(Some(items)) => match check(&items) {
                    Ok(()) => Probe::Ready(()),
                    Err(observed) => Probe::Pending(observed),
                },
                Ok(None) => Probe::Pending(format!("no '{}' key", this.key)),
                Err(e) => Probe::Pending(format!("unparseable '{}': {}", this.key, e)),
            };
            Ok(probe)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(r#"[]"#, 0 ; "empty list")]
    #[test_case(r#"[{"title":"a","completed":false}]"#, 1 ; "one item")]
    #[test_case(r#"[{"id":"x1","title":"a","completed":true},{"id":"x2","title":"b","completed":false}]"#, 2 ; "extra fields ignored")]
    fn parses_persisted_list(raw: &str, len: usize) {
        let items = parse_todos(Some(raw)).unwrap().unwrap();
        assert_eq!(items.len(), len);
    }

    #[test]
    fn missing_key_is_not_an_error() {
        assert!(parse_todos(None).unwrap().is_none());
    }

    #[test]
    fn malformed_value_is_a_json_error() {
        assert!(parse_todos(Some("not json")).is_err());
        assert!(parse_todos(Some(r#"[{"title":"no flag"}]"#)).is_err());
    }

    #[test]
    fn keeps_order_and_flags() {
        let raw = r#"[{"title":"buy some cheese","completed":false},{"title":"feed the cat","completed":true}]"#;
        let items = parse_todos(Some(raw)).unwrap().unwrap();
        assert_eq!(
            items,
            vec![
                TodoItem::new("buy some cheese", false),
                TodoItem::new("feed the cat", true),
            ]
        );
    }
}
