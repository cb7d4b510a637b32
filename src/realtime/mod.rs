//! Table change feed.
//!
//! Services publish a [`ChangeEvent`] after every committed write. Views
//! and the SSE endpoint consume it through [`SubscriptionManager`], which
//! filters by table, change kind and an optional column equality.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTable {
    Orders,
    Products,
    Ratings,
}

impl fmt::Display for FeedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedTable::Orders => "orders",
            FeedTable::Products => "products",
            FeedTable::Ratings => "ratings",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed row change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: FeedTable,
    pub kind: ChangeKind,
    /// Row after the change; absent for deletes
    pub new: Option<JsonValue>,
    /// Row before the change; absent for inserts
    pub old: Option<JsonValue>,
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn insert<T: Serialize>(table: FeedTable, row: &T) -> Self {
        Self::build(table, ChangeKind::Insert, Some(row), None)
    }

    pub fn update<T: Serialize>(table: FeedTable, old: &T, new: &T) -> Self {
        Self::build(table, ChangeKind::Update, Some(new), Some(old))
    }

    pub fn delete<T: Serialize>(table: FeedTable, old: &T) -> Self {
        Self::build(table, ChangeKind::Delete, None, Some(old))
    }

    fn build<T: Serialize>(
        table: FeedTable,
        kind: ChangeKind,
        new: Option<&T>,
        old: Option<&T>,
    ) -> Self {
        let encode = |row: &T| serde_json::to_value(row).ok();
        Self {
            table,
            kind,
            new: new.and_then(encode),
            old: old.and_then(encode),
            committed_at: Utc::now(),
        }
    }

    /// The row a filter is evaluated against
    pub fn record(&self) -> Option<&JsonValue> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// Reads an integer column from the current row
    pub fn int_column(&self, column: &str) -> Option<i64> {
        self.record()?.get(column)?.as_i64()
    }
}

/// `column = value` over the changed row
#[derive(Debug, Clone, PartialEq)]
pub struct RowFilter {
    pub column: String,
    pub value: JsonValue,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Serialize) -> Self {
        Self {
            column: column.into(),
            value: serde_json::to_value(value).unwrap_or(JsonValue::Null),
        }
    }

    fn matches(&self, record: &JsonValue) -> bool {
        record.get(&self.column) == Some(&self.value)
    }
}

/// What a listener wants to hear about
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub table: FeedTable,
    /// `None` listens to every kind
    pub kind: Option<ChangeKind>,
    pub filter: Option<RowFilter>,
}

impl Subscription {
    pub fn new(table: FeedTable) -> Self {
        Self {
            table,
            kind: None,
            filter: None,
        }
    }

    pub fn on(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != event.kind) {
            return false;
        }
        match (&self.filter, event.record()) {
            (None, _) => true,
            (Some(filter), Some(record)) => filter.matches(record),
            (Some(_), None) => false,
        }
    }
}

/// Broadcast side of the feed
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event; returns how many listeners received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        debug!(table = %event.table, kind = ?event.kind, "publishing change");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn receiver(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

/// Owns a listener task; dropping it stops delivery.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Single entry point for feed consumers
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    feed: ChangeFeed,
}

impl SubscriptionManager {
    pub fn new(feed: ChangeFeed) -> Self {
        Self { feed }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Runs `on_change` for every matching event until the handle is dropped.
    pub fn subscribe<F, Fut>(&self, subscription: Subscription, on_change: F) -> SubscriptionHandle
    where
        F: Fn(ChangeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.feed.receiver();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if subscription.matches(&event) => on_change(event).await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            table = %subscription.table,
                            skipped,
                            "subscriber lagged; events dropped"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        SubscriptionHandle { task }
    }

    /// Matching events as a stream, for long-lived HTTP responses.
    pub fn stream(
        &self,
        subscription: Subscription,
    ) -> impl Stream<Item = ChangeEvent> + Send + 'static {
        futures::stream::unfold(
            (self.feed.receiver(), subscription),
            |(mut rx, subscription)| async move {
                loop {
                    match rx.recv().await {
                        Ok(event) if subscription.matches(&event) => {
                            return Some((event, (rx, subscription)))
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                table = %subscription.table,
                                skipped,
                                "stream lagged; events dropped"
                            );
                            continue;
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::Duration;

    fn order_row(order_id: i32, buyer: &str, status_id: i32) -> JsonValue {
        json!({ "order_id": order_id, "buyer_id": buyer, "status_id": status_id })
    }

    #[test]
    fn subscription_matching() {
        let sub = Subscription::new(FeedTable::Orders)
            .on(ChangeKind::Update)
            .filter(RowFilter::eq("buyer_id", "b-1"));

        let mine = ChangeEvent::update(
            FeedTable::Orders,
            &order_row(1, "b-1", 1),
            &order_row(1, "b-1", 2),
        );
        let theirs = ChangeEvent::update(
            FeedTable::Orders,
            &order_row(2, "b-2", 1),
            &order_row(2, "b-2", 2),
        );
        let inserted = ChangeEvent::insert(FeedTable::Orders, &order_row(3, "b-1", 1));
        let product = ChangeEvent::insert(FeedTable::Products, &json!({ "buyer_id": "b-1" }));

        assert!(sub.matches(&mine));
        assert!(!sub.matches(&theirs));
        assert!(!sub.matches(&inserted));
        assert!(!sub.matches(&product));
        assert_eq!(mine.int_column("status_id"), Some(2));
    }

    #[test]
    fn delete_events_filter_on_old_row() {
        let sub = Subscription::new(FeedTable::Orders).filter(RowFilter::eq("buyer_id", "b-9"));
        let deleted = ChangeEvent::delete(FeedTable::Orders, &order_row(4, "b-9", 5));
        assert!(sub.matches(&deleted));
    }

    #[test]
    fn publish_without_listeners_is_harmless() {
        let feed = ChangeFeed::new(4);
        assert_eq!(
            feed.publish(ChangeEvent::insert(FeedTable::Orders, &order_row(1, "b", 1))),
            0
        );
    }

    #[tokio::test]
    async fn dropped_handle_stops_delivery() {
        let manager = SubscriptionManager::new(ChangeFeed::new(16));
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let handle = manager.subscribe(Subscription::new(FeedTable::Orders), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager
            .feed()
            .publish(ChangeEvent::insert(FeedTable::Orders, &order_row(1, "b", 1)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager
            .feed()
            .publish(ChangeEvent::insert(FeedTable::Orders, &order_row(2, "b", 1)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_yields_only_matching_events() {
        use futures::StreamExt;

        let manager = SubscriptionManager::new(ChangeFeed::new(16));
        let stream = manager.stream(
            Subscription::new(FeedTable::Orders).filter(RowFilter::eq("buyer_id", "b-1")),
        );
        futures::pin_mut!(stream);

        manager
            .feed()
            .publish(ChangeEvent::insert(FeedTable::Orders, &order_row(1, "b-2", 1)));
        manager
            .feed()
            .publish(ChangeEvent::insert(FeedTable::Orders, &order_row(2, "b-1", 1)));

        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.int_column("order_id"), Some(2));
    }
}
