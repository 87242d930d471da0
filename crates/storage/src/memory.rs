//! In-process realtime document store.
//!
//! Holds one JSON tree, applies every write atomically for its own path and fans a fresh
//! snapshot out to each listener whose path overlaps the write. Used by tests and the demo
//! binary in place of the managed backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use snafu::ensure;
use tokio::sync::mpsc;

use super::document::{BoxFuture, DocumentStore, Snapshot, Subscription};
use super::error::{StorageResult, UnavailableSnafu, WriteRejectedSnafu};
use super::path::DocPath;

struct Listener {
    path: DocPath,
    sender: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct MemoryState {
    root: Value,
    listeners: HashMap<u64, Listener>,
    next_listener_id: u64,
    next_push_seq: u64,
    offline: bool,
    rejected_prefixes: Vec<DocPath>,
    write_count: u64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every read and write fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Rejects writes at or below `prefix`, simulating a security-rule denial.
    pub fn reject_writes_under(&self, prefix: DocPath) {
        self.lock().rejected_prefixes.push(prefix);
    }

    pub fn clear_rejections(&self) {
        self.lock().rejected_prefixes.clear();
    }

    pub fn listener_count(&self) -> usize {
        let mut state = self.lock();
        state.listeners.retain(|_, listener| !listener.sender.is_closed());
        state.listeners.len()
    }

    pub fn write_count(&self) -> u64 {
        self.lock().write_count
    }

    /// Synchronous read for assertions.
    pub fn value_at(&self, path: &DocPath) -> Option<Value> {
        lookup(&self.lock().root, path.segments()).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(
        &self,
        stage: &'static str,
        path: &DocPath,
        apply: impl FnOnce(&mut Value),
    ) -> StorageResult<()> {
        let mut state = self.lock();
        ensure!(!state.offline, UnavailableSnafu { stage });
        ensure!(
            !state
                .rejected_prefixes
                .iter()
                .any(|prefix| prefix.contains(path)),
            WriteRejectedSnafu {
                stage,
                path: path.to_string(),
            }
        );

        apply(&mut state.root);
        state.write_count += 1;
        tracing::trace!(%path, stage, "memory store write applied");
        notify(&mut state, path);
        Ok(())
    }

    fn next_push_key(state: &mut MemoryState) -> String {
        state.next_push_seq += 1;
        // Fixed width keeps lexical key order equal to push order.
        format!("-m{:012}", state.next_push_seq)
    }
}

impl DocumentStore for MemoryStore {
    fn get<'a>(&'a self, path: &'a DocPath) -> BoxFuture<'a, StorageResult<Option<Value>>> {
        Box::pin(async move {
            let state = self.lock();
            ensure!(!state.offline, UnavailableSnafu { stage: "memory-get" });
            Ok(lookup(&state.root, path.segments()).cloned())
        })
    }

    fn set<'a>(&'a self, path: &'a DocPath, value: Value) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.write("memory-set", path, |root| {
                write_at(root, path.segments(), prune_nulls(value));
            })
        })
    }

    fn update<'a>(
        &'a self,
        path: &'a DocPath,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.write("memory-update", path, |root| {
                for (key, value) in fields {
                    let mut segments = path.segments().to_vec();
                    segments.push(key);
                    write_at(root, &segments, prune_nulls(value));
                }
            })
        })
    }

    fn remove<'a>(&'a self, path: &'a DocPath) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.write("memory-remove", path, |root| {
                write_at(root, path.segments(), Value::Null);
            })
        })
    }

    fn push<'a>(&'a self, path: &'a DocPath, value: Value) -> BoxFuture<'a, StorageResult<String>> {
        Box::pin(async move {
            let key = {
                let mut state = self.lock();
                ensure!(!state.offline, UnavailableSnafu { stage: "memory-push" });
                Self::next_push_key(&mut state)
            };
            let child = path.child(&key)?;
            self.write("memory-push", &child, |root| {
                write_at(root, child.segments(), prune_nulls(value));
            })?;
            Ok(key)
        })
    }

    fn subscribe(&self, path: &DocPath) -> StorageResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let listener_id = {
            let mut state = self.lock();
            ensure!(!state.offline, UnavailableSnafu { stage: "memory-subscribe" });

            let initial = Snapshot::new(path.clone(), lookup(&state.root, path.segments()).cloned());
            let _ = sender.send(initial);

            let listener_id = state.next_listener_id;
            state.next_listener_id += 1;
            state.listeners.insert(
                listener_id,
                Listener {
                    path: path.clone(),
                    sender,
                },
            );
            listener_id
        };

        tracing::debug!(%path, listener_id, "memory store listener attached");
        let state = Arc::downgrade(&self.state);
        Ok(Subscription::new(path.clone(), receiver, move || {
            if let Some(state) = state.upgrade() {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.listeners.remove(&listener_id);
            }
        }))
    }
}

fn notify(state: &mut MemoryState, written: &DocPath) {
    let MemoryState {
        root, listeners, ..
    } = state;

    listeners.retain(|listener_id, listener| {
        if !listener.path.overlaps(written) {
            return !listener.sender.is_closed();
        }

        let snapshot = Snapshot::new(
            listener.path.clone(),
            lookup(root, listener.path.segments()).cloned(),
        );
        let delivered = listener.sender.send(snapshot).is_ok();
        if !delivered {
            tracing::debug!(listener_id, path = %listener.path, "pruning closed listener");
        }
        delivered
    });
}

fn lookup<'v>(root: &'v Value, segments: &[String]) -> Option<&'v Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    if node.is_null() { None } else { Some(node) }
}

fn write_at(node: &mut Value, segments: &[String], value: Value) {
    if value.is_null() {
        if segments.is_empty() {
            *node = Value::Null;
        } else {
            remove_at(node, segments);
        }
        return;
    }

    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(children) = node {
        let child = children.entry(head.clone()).or_insert(Value::Null);
        write_at(child, rest, value);
    }
}

/// Removes the value at `segments` and prunes ancestors left empty. Returns true when `node`
/// itself became empty.
fn remove_at(node: &mut Value, segments: &[String]) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        return true;
    };
    let Value::Object(children) = node else {
        return false;
    };

    if rest.is_empty() {
        children.remove(head);
    } else if let Some(child) = children.get_mut(head)
        && remove_at(child, rest)
    {
        children.remove(head);
    }
    children.is_empty()
}

/// Drops null members and empty objects the way the managed store never persists them.
fn prune_nulls(value: Value) -> Value {
    match value {
        Value::Object(children) => {
            let pruned = children
                .into_iter()
                .map(|(key, child)| (key, prune_nulls(child)))
                .filter(|(_, child)| !child.is_null())
                .collect::<Map<_, _>>();
            if pruned.is_empty() {
                Value::Null
            } else {
                Value::Object(pruned)
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> DocPath {
        DocPath::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn set_get_update_remove_roundtrip() {
        let store = MemoryStore::new();
        let chat = path("chats/u1/s1");

        store
            .set(&chat, json!({ "title": "Hello", "messageCount": 1 }))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("messageCount".into(), json!(2));
        fields.insert("title".into(), Value::Null);
        store.update(&chat, fields).await.unwrap();

        assert_eq!(
            store.get(&chat).await.unwrap(),
            Some(json!({ "messageCount": 2 }))
        );

        store.remove(&chat).await.unwrap();
        assert_eq!(store.get(&chat).await.unwrap(), None);
        // Empty ancestors disappear with their last child.
        assert_eq!(store.get(&path("chats")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn push_keys_follow_insertion_order() {
        let store = MemoryStore::new();
        let messages = path("messages/u1/s1");

        let first = store.push(&messages, json!({ "n": 1 })).await.unwrap();
        let second = store.push(&messages, json!({ "n": 2 })).await.unwrap();
        assert!(first < second);

        let value = store.get(&messages).await.unwrap().unwrap();
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn subscribers_get_initial_and_overlapping_snapshots_only() {
        let store = MemoryStore::new();
        let chats = path("chats/u1");
        let mut subscription = store.subscribe(&chats).unwrap();

        let initial = subscription.recv().await.unwrap();
        assert_eq!(initial.value, None);

        store.set(&path("folders/u1/f1"), json!({ "name": "x" })).await.unwrap();
        store.set(&path("chats/u1/s1"), json!({ "title": "a" })).await.unwrap();

        let snapshot = subscription.recv().await.unwrap();
        assert_eq!(snapshot.path, chats);
        assert_eq!(snapshot.value, Some(json!({ "s1": { "title": "a" } })));
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropping_a_subscription_detaches_the_listener() {
        let store = MemoryStore::new();
        let subscription = store.subscribe(&path("settings")).unwrap();
        assert_eq!(store.listener_count(), 1);

        drop(subscription);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn offline_and_rejected_writes_fail_without_applying() {
        let store = MemoryStore::new();
        store.reject_writes_under(path("chats"));

        let rejected = store.set(&path("chats/u1/s1"), json!({ "title": "x" })).await;
        assert!(matches!(rejected, Err(crate::StorageError::WriteRejected { .. })));
        assert_eq!(store.value_at(&path("chats/u1/s1")), None);

        store.clear_rejections();
        store.set_offline(true);
        assert!(matches!(
            store.get(&path("chats")).await,
            Err(crate::StorageError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn null_members_are_never_stored() {
        let store = MemoryStore::new();
        let target = path("users/u1");
        store
            .set(&target, json!({ "email": "a@b.c", "locale": null, "nested": { "x": null } }))
            .await
            .unwrap();

        assert_eq!(store.value_at(&target), Some(json!({ "email": "a@b.c" })));
    }
}
