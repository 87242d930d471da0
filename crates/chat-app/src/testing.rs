//! Shared fixtures for in-crate tests.

use std::sync::Arc;

use relay_storage::{
    DocumentStore, MemoryBlobStore, MemoryStore, SessionId, SessionRecord, UserId, paths, put,
};

use crate::clock::ManualClock;

pub const TEST_START_MS: u64 = 1_700_000_000_000;

/// Lets spawned pump tasks run until `condition` holds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was not reached");
}

pub struct Backend {
    pub store: MemoryStore,
    pub blobs: Arc<MemoryBlobStore>,
    pub clock: Arc<ManualClock>,
}

impl Backend {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            blobs: Arc::new(MemoryBlobStore::new()),
            clock: Arc::new(ManualClock::new(TEST_START_MS)),
        }
    }

    pub fn shared_store(&self) -> Arc<dyn DocumentStore> {
        Arc::new(self.store.clone())
    }

    pub async fn seed_session(&self, uid: &UserId, id: &str, record: SessionRecord) -> SessionId {
        let session_id = SessionId::new(id);
        put(&self.store, &paths::chat(uid, &session_id), &record)
            .await
            .unwrap();
        session_id
    }
}

pub fn session(title: &str, last_message: u64, message_count: u64) -> SessionRecord {
    SessionRecord {
        id: SessionId::default(),
        title: title.to_string(),
        model: relay_llm::DEFAULT_MODEL.to_string(),
        created_at: last_message,
        last_message,
        message_count,
        folder_id: None,
    }
}
