//! Row-change notifications, published after each successful write and
//! streamed to dashboards over Server-Sent Events.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 256;

/// Tables a client may subscribe to.
pub const TABLES: &[&str] = &[
    "customers",
    "products",
    "inventory_items",
    "inventory_movements",
    "storage_rates",
    "audits",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// One row change: `new` is absent for deletes, `old` for inserts.
#[derive(Debug, Clone, Serialize)]
pub struct RowChange {
    pub table: &'static str,
    pub event: ChangeKind,
    pub new: Option<JsonValue>,
    pub old: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<RowChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    pub fn is_known_table(table: &str) -> bool {
        TABLES.contains(&table)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RowChange> {
        self.sender.subscribe()
    }

    pub fn publish(&self, change: RowChange) {
        // No subscribers is the common case and not an error.
        let _ = self.sender.send(change);
    }

    pub fn inserted<T: Serialize>(&self, table: &'static str, row: &T) {
        self.publish(RowChange {
            table,
            event: ChangeKind::Insert,
            new: to_json(row),
            old: None,
        });
    }

    pub fn updated<T: Serialize>(&self, table: &'static str, old: &T, new: &T) {
        self.publish(RowChange {
            table,
            event: ChangeKind::Update,
            new: to_json(new),
            old: to_json(old),
        });
    }

    pub fn deleted<T: Serialize>(&self, table: &'static str, old: &T) {
        self.publish(RowChange {
            table,
            event: ChangeKind::Delete,
            new: None,
            old: to_json(old),
        });
    }
}

fn to_json<T: Serialize>(row: &T) -> Option<JsonValue> {
    match serde_json::to_value(row) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("could not serialize row change: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_changes_in_publish_order() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe();

        feed.inserted("customers", &json!({"id": 1, "name": "GreenTech"}));
        feed.updated("customers", &json!({"id": 1}), &json!({"id": 1, "name": "GreenTech Solutions"}));
        feed.deleted("customers", &json!({"id": 1}));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, ChangeKind::Insert);
        assert!(first.old.is_none());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, ChangeKind::Update);
        assert_eq!(second.new.unwrap()["name"], "GreenTech Solutions");

        let third = rx.recv().await.unwrap();
        assert_eq!(third.event, ChangeKind::Delete);
        assert!(third.new.is_none());
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        ChangeFeed::new().inserted("audits", &json!({"id": 7}));
    }

    #[test]
    fn only_known_tables_are_streamed() {
        assert!(ChangeFeed::is_known_table("inventory_movements"));
        assert!(!ChangeFeed::is_known_table("users"));
    }

    #[test]
    fn change_serializes_with_uppercase_event() {
        let change = RowChange {
            table: "audits",
            event: ChangeKind::Update,
            new: Some(json!({"status": "completed"})),
            old: Some(json!({"status": "in_progress"})),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["event"], "UPDATE");
        assert_eq!(value["old"]["status"], "in_progress");
    }
}
