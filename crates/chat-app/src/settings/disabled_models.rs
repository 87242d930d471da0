use std::collections::BTreeSet;
use std::sync::Arc;

use relay_storage::{DocumentStore, Snapshot, StorageResult, paths, sanitize_key};
use serde_json::Value;
use tokio::sync::watch;

use crate::live::LiveValue;

/// Models switched off by an operator, keyed by sanitized model id.
///
/// Both lookups and writes go through `sanitize_key`, so `gpt-4.1` and the stored key
/// `gpt-4_1` always agree.
#[derive(Clone)]
pub struct DisabledModels {
    live: Arc<LiveValue<BTreeSet<String>>>,
}

impl DisabledModels {
    pub fn start(store: &dyn DocumentStore) -> StorageResult<Self> {
        let live = LiveValue::spawn(
            store,
            paths::disabled_models(),
            BTreeSet::new(),
            disabled_keys,
        )?;
        Ok(Self {
            live: Arc::new(live),
        })
    }

    pub fn is_disabled(&self, model_id: &str) -> bool {
        self.live.get().contains(&sanitize_key(model_id))
    }

    pub fn sanitized_keys(&self) -> BTreeSet<String> {
        self.live.get()
    }

    pub fn watch(&self) -> watch::Receiver<BTreeSet<String>> {
        self.live.watch()
    }
}

fn disabled_keys(snapshot: &Snapshot) -> BTreeSet<String> {
    let Some(Value::Object(entries)) = &snapshot.value else {
        return BTreeSet::new();
    };
    entries
        .iter()
        .filter(|(_, flag)| flag.as_bool().unwrap_or(false))
        .map(|(key, _)| key.clone())
        .collect()
}
