use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use snafu::ResultExt;
use tokio::sync::mpsc;

use super::error::{DecodeSnafu, EncodeSnafu, StorageResult};
use super::path::DocPath;
use super::types::KeyedRecord;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Full value observed at a subscribed path after one applied write.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: DocPath,
    pub value: Option<Value>,
}

impl Snapshot {
    pub fn new(path: DocPath, value: Option<Value>) -> Self {
        Self { path, value }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StorageResult<Option<T>> {
        self.value
            .clone()
            .map(|value| decode_value(&self.path, value))
            .transpose()
    }

    pub fn records<T: DeserializeOwned + KeyedRecord>(&self) -> Vec<T> {
        decode_records(&self.path, self.value.clone())
    }
}

/// Live feed of snapshots for one path.
///
/// Dropping the subscription detaches it from the store, so owning components tear down a
/// listener simply by dropping (or aborting the task that owns) its subscription.
pub struct Subscription {
    path: DocPath,
    snapshots: mpsc::UnboundedReceiver<Snapshot>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        path: DocPath,
        snapshots: mpsc::UnboundedReceiver<Snapshot>,
        detach: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path,
            snapshots,
            detach: Some(Box::new(detach)),
        }
    }

    pub fn path(&self) -> &DocPath {
        &self.path
    }

    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.snapshots.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Snapshot> {
        self.snapshots.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        let Some(detach) = self.detach.take() else {
            return false;
        };
        detach();
        self.snapshots.close();
        true
    }

    pub fn is_active(&self) -> bool {
        self.detach.is_some()
    }
}

impl Stream for Subscription {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Snapshot>> {
        self.snapshots.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.detach.is_some())
            .finish()
    }
}

/// Realtime key-path document database.
///
/// Writes are atomic per path only. Subscribers receive the full value at their own path each
/// time an overlapping write lands, starting with the value current at subscribe time.
pub trait DocumentStore: Send + Sync {
    fn get<'a>(&'a self, path: &'a DocPath) -> BoxFuture<'a, StorageResult<Option<Value>>>;
    fn set<'a>(&'a self, path: &'a DocPath, value: Value) -> BoxFuture<'a, StorageResult<()>>;
    /// Shallow merge of `fields` into the object at `path`; `null` fields are removed.
    fn update<'a>(
        &'a self,
        path: &'a DocPath,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, StorageResult<()>>;
    fn remove<'a>(&'a self, path: &'a DocPath) -> BoxFuture<'a, StorageResult<()>>;
    /// Appends `value` under a generated child key and returns that key.
    fn push<'a>(&'a self, path: &'a DocPath, value: Value) -> BoxFuture<'a, StorageResult<String>>;
    fn subscribe(&self, path: &DocPath) -> StorageResult<Subscription>;
}

pub async fn fetch<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &DocPath,
) -> StorageResult<Option<T>> {
    store
        .get(path)
        .await?
        .map(|value| decode_value(path, value))
        .transpose()
}

pub async fn fetch_records<T: DeserializeOwned + KeyedRecord>(
    store: &dyn DocumentStore,
    path: &DocPath,
) -> StorageResult<Vec<T>> {
    let value = store.get(path).await?;
    Ok(decode_records(path, value))
}

pub async fn put<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    path: &DocPath,
    value: &T,
) -> StorageResult<()> {
    let value = encode_value(path, value)?;
    store.set(path, value).await
}

pub async fn append<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    path: &DocPath,
    value: &T,
) -> StorageResult<String> {
    let value = encode_value(path, value)?;
    store.push(path, value).await
}

pub fn encode_value<T: Serialize + ?Sized>(path: &DocPath, value: &T) -> StorageResult<Value> {
    serde_json::to_value(value).context(EncodeSnafu {
        stage: "encode-document",
        path: path.to_string(),
    })
}

pub fn decode_value<T: DeserializeOwned>(path: &DocPath, value: Value) -> StorageResult<T> {
    serde_json::from_value(value).context(DecodeSnafu {
        stage: "decode-document",
        path: path.to_string(),
    })
}

/// Decodes every child of a collection, keeping the key as the record id.
///
/// Malformed children are skipped with a warning so one bad row cannot blank a whole view.
pub fn decode_records<T: DeserializeOwned + KeyedRecord>(
    path: &DocPath,
    value: Option<Value>,
) -> Vec<T> {
    let Some(Value::Object(children)) = value else {
        return Vec::new();
    };

    children
        .into_iter()
        .filter_map(|(key, child)| match serde_json::from_value::<T>(child) {
            Ok(mut record) => {
                record.assign_key(&key);
                Some(record)
            }
            Err(error) => {
                tracing::warn!(%path, %key, %error, "skipping malformed child record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SessionId;
    use crate::types::SessionRecord;
    use serde_json::json;

    #[test]
    fn decode_records_assigns_keys_and_skips_malformed_rows() {
        let path = DocPath::parse("chats/u1").unwrap();
        let value = json!({
            "s1": { "title": "First", "model": "gpt-4o", "messageCount": 2 },
            "s2": { "title": 42 },
        });

        let records: Vec<SessionRecord> = decode_records(&path, Some(value));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, SessionId::new("s1"));
        assert_eq!(records[0].message_count, 2);
    }

    #[test]
    fn snapshot_of_missing_value_decodes_to_none() {
        let snapshot = Snapshot::new(DocPath::parse("settings").unwrap(), None);
        assert!(!snapshot.exists());
        assert_eq!(snapshot.decode::<Value>().unwrap(), None);
        assert!(snapshot.records::<SessionRecord>().is_empty());
    }

    #[test]
    fn cancel_runs_detach_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let detached = Arc::new(AtomicUsize::new(0));
        let counter = detached.clone();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(DocPath::root(), rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscription.cancel());
        assert!(!subscription.cancel());
        drop(subscription);
        assert_eq!(detached.load(Ordering::SeqCst), 1);
    }
}
