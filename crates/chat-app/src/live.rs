use futures::StreamExt;
use relay_storage::{DocPath, DocumentStore, Snapshot, StorageResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One subscribed path decoded into a watched value.
///
/// The first snapshot is applied before `spawn` returns, so `get` is meaningful immediately.
/// Later snapshots are applied by a pump task that is aborted when the value is dropped.
pub struct LiveValue<T> {
    path: DocPath,
    receiver: watch::Receiver<T>,
    pump: JoinHandle<()>,
}

impl<T> LiveValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn spawn(
        store: &dyn DocumentStore,
        path: DocPath,
        initial: T,
        decode: impl Fn(&Snapshot) -> T + Send + 'static,
    ) -> StorageResult<Self> {
        let mut subscription = store.subscribe(&path)?;
        let first = subscription
            .try_recv()
            .map(|snapshot| decode(&snapshot))
            .unwrap_or(initial);
        let (sender, receiver) = watch::channel(first);

        let pump_path = path.clone();
        let pump = tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                sender.send_replace(decode(&snapshot));
            }
            tracing::debug!(path = %pump_path, "live value subscription closed");
        });
        tracing::debug!(%path, "live value subscribed");

        Ok(Self {
            path,
            receiver,
            pump,
        })
    }

    pub fn path(&self) -> &DocPath {
        &self.path
    }

    pub fn get(&self) -> T {
        self.receiver.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<T> {
        self.receiver.clone()
    }
}

impl<T> Drop for LiveValue<T> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use relay_storage::{MemoryStore, paths};
    use serde_json::json;

    use super::*;
    use crate::testing::eventually;

    #[tokio::test]
    async fn first_snapshot_is_available_synchronously() {
        let store = MemoryStore::new();
        store
            .set(&paths::settings(), json!({"maintenance": true}))
            .await
            .unwrap();

        let live = LiveValue::spawn(&store, paths::settings(), false, |snapshot| {
            snapshot
                .value
                .as_ref()
                .and_then(|value| value.get("maintenance"))
                .and_then(|value| value.as_bool())
                .unwrap_or(false)
        })
        .unwrap();

        assert!(live.get());
    }

    #[tokio::test]
    async fn later_writes_reach_the_value_and_drop_detaches() {
        let store = MemoryStore::new();
        let live = LiveValue::spawn(&store, paths::settings(), None, |snapshot| {
            snapshot.value.clone()
        })
        .unwrap();
        assert_eq!(live.get(), None);

        store
            .set(&paths::settings(), json!({"announcement": "hi"}))
            .await
            .unwrap();
        eventually(|| live.get().is_some()).await;

        drop(live);
        eventually(|| store.listener_count() == 0).await;
    }
}
