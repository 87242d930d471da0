use std::collections::BTreeMap;
use std::sync::Arc;

use relay_storage::{DocumentStore, StorageError, UptimeStatus, fetch, paths, put};
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};

use crate::clock::SharedClock;

pub const UPTIME_SLOTS: usize = 90;
pub const DEFAULT_COMPONENTS: [&str; 4] = ["web", "api", "database", "auth"];

pub type StatusResult<T> = Result<T, StatusError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StatusError {
    #[snafu(display("store call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("uptime slot {index} is out of range on `{stage}`"))]
    SlotOutOfRange { stage: &'static str, index: usize },
}

/// Exactly [`UPTIME_SLOTS`] entries, oldest first. Short histories are padded at the old end
/// with operational days, long ones keep their most recent entries.
pub fn normalize_slots(mut slots: Vec<UptimeStatus>) -> Vec<UptimeStatus> {
    if slots.len() > UPTIME_SLOTS {
        slots.drain(..slots.len() - UPTIME_SLOTS);
        return slots;
    }
    let mut padded = vec![UptimeStatus::Operational; UPTIME_SLOTS - slots.len()];
    padded.extend(slots);
    padded
}

/// Share of days that were operational or under planned maintenance, as a percentage.
pub fn availability(slots: &[UptimeStatus]) -> f64 {
    if slots.is_empty() {
        return 100.0;
    }
    let up = slots
        .iter()
        .filter(|slot| matches!(slot, UptimeStatus::Operational | UptimeStatus::Maintenance))
        .count();
    up as f64 * 100.0 / slots.len() as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentStatus {
    pub key: String,
    pub slots: Vec<UptimeStatus>,
    pub availability: f64,
}

impl ComponentStatus {
    pub fn current(&self) -> UptimeStatus {
        self.slots.last().copied().unwrap_or_default()
    }
}

/// Worst current state across all components.
pub fn overall_status(components: &[ComponentStatus]) -> UptimeStatus {
    components
        .iter()
        .map(ComponentStatus::current)
        .max()
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct StatusBoard {
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
}

impl StatusBoard {
    pub fn new(store: Arc<dyn DocumentStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Every stored component plus the defaults, sorted by key.
    pub async fn load(&self) -> StatusResult<Vec<ComponentStatus>> {
        let stored = fetch::<BTreeMap<String, Value>>(self.store.as_ref(), &paths::uptime_root())
            .await
            .context(StorageSnafu {
                stage: "read-uptime",
            })?
            .unwrap_or_default();

        let mut histories: BTreeMap<String, Vec<UptimeStatus>> = DEFAULT_COMPONENTS
            .iter()
            .map(|key| (key.to_string(), Vec::new()))
            .collect();
        for (key, value) in stored {
            histories.insert(key, decode_slots(value));
        }

        Ok(histories
            .into_iter()
            .map(|(key, slots)| {
                let slots = normalize_slots(slots);
                ComponentStatus {
                    availability: availability(&slots),
                    key,
                    slots,
                }
            })
            .collect())
    }

    pub(crate) async fn set_slot(
        &self,
        component: &str,
        index: usize,
        status: UptimeStatus,
    ) -> StatusResult<()> {
        ensure!(
            index < UPTIME_SLOTS,
            SlotOutOfRangeSnafu {
                stage: "set-uptime-slot",
                index,
            }
        );
        let path = paths::uptime(component).context(StorageSnafu {
            stage: "uptime-path",
        })?;
        let current = fetch::<Value>(self.store.as_ref(), &path)
            .await
            .context(StorageSnafu {
                stage: "read-uptime-slots",
            })?
            .map(decode_slots)
            .unwrap_or_default();
        let mut slots = normalize_slots(current);
        slots[index] = status;
        put(self.store.as_ref(), &path, &slots)
            .await
            .context(StorageSnafu {
                stage: "write-uptime-slots",
            })?;
        tracing::info!(component, index, ?status, "uptime slot set");
        Ok(())
    }

    /// Drops a visit marker for traffic stats.
    pub async fn record_visit(&self) -> StatusResult<u64> {
        let now = self.clock.now_ms();
        self.store
            .set(&paths::visit(now), Value::Bool(true))
            .await
            .context(StorageSnafu {
                stage: "record-visit",
            })?;
        tracing::debug!(timestamp = now, "visit recorded");
        Ok(now)
    }
}

/// Unknown entries count as operational so one bad value cannot paint a day red.
fn decode_slots(value: Value) -> Vec<UptimeStatus> {
    match value {
        Value::Array(entries) => entries
            .into_iter()
            .map(|entry| serde_json::from_value(entry).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    }
}
