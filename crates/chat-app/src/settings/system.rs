use std::sync::Arc;

use relay_storage::{DocumentStore, StorageResult, SystemSettings, paths};
use tokio::sync::watch;

use crate::live::LiveValue;

/// Live copy of the global settings singleton.
#[derive(Clone)]
pub struct SystemSettingsWatch {
    live: Arc<LiveValue<SystemSettings>>,
}

impl SystemSettingsWatch {
    pub fn start(store: &dyn DocumentStore) -> StorageResult<Self> {
        let live = LiveValue::spawn(
            store,
            paths::settings(),
            SystemSettings::default(),
            |snapshot| match snapshot.decode::<SystemSettings>() {
                Ok(settings) => settings.unwrap_or_default(),
                Err(error) => {
                    tracing::warn!(%error, "system settings are malformed, using defaults");
                    SystemSettings::default()
                }
            },
        )?;
        Ok(Self {
            live: Arc::new(live),
        })
    }

    pub fn current(&self) -> SystemSettings {
        self.live.get()
    }

    pub fn watch(&self) -> watch::Receiver<SystemSettings> {
        self.live.watch()
    }
}

#[cfg(test)]
mod tests {
    use relay_storage::{MemoryStore, PaymentMode};
    use serde_json::json;

    use super::*;
    use crate::testing::eventually;

    #[tokio::test]
    async fn missing_document_yields_defaults_and_updates_flow_through() {
        let store = MemoryStore::new();
        let settings = SystemSettingsWatch::start(&store).unwrap();
        assert_eq!(settings.current(), SystemSettings::default());

        store
            .set(
                &paths::settings(),
                json!({"maintenance": true, "paymentMode": "invalid_card", "freeRequestLimit": 3}),
            )
            .await
            .unwrap();

        eventually(|| settings.current().maintenance).await;
        let current = settings.current();
        assert_eq!(current.payment_mode, PaymentMode::InvalidCard);
        assert_eq!(current.free_request_limit, 3);
        assert!(current.registration_enabled);
    }
}
