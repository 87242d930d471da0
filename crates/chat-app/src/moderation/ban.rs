use std::sync::{Arc, Weak};
use std::time::Duration;

use relay_storage::{BanRecord, DocumentStore, Snapshot, UserId, paths};
use serde_json::{Map, Value};
use snafu::ResultExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::{ModerationResult, StorageSnafu};
use crate::clock::SharedClock;
use crate::live::LiveValue;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BanState {
    #[default]
    Unbanned,
    BannedFinite {
        reason: String,
        expires_at_ms: u64,
    },
    BannedPermanent {
        reason: String,
    },
}

impl BanState {
    pub fn from_record(record: Option<&BanRecord>) -> Self {
        let Some(record) = record else {
            return Self::Unbanned;
        };
        match record.expires_at_ms() {
            Some(expires_at_ms) => Self::BannedFinite {
                reason: record.reason.clone(),
                expires_at_ms,
            },
            None => Self::BannedPermanent {
                reason: record.reason.clone(),
            },
        }
    }

    pub fn is_banned(&self) -> bool {
        !matches!(self, Self::Unbanned)
    }

    /// True once a finite ban may be lifted; permanent bans never expire.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self {
            Self::BannedFinite { expires_at_ms, .. } => now_ms >= *expires_at_ms,
            Self::Unbanned | Self::BannedPermanent { .. } => false,
        }
    }

    /// The state as of `now_ms`: a finite ban past its expiry no longer applies, even while
    /// its record is still stored.
    pub fn in_effect(self, now_ms: u64) -> Self {
        if self.is_expired(now_ms) {
            Self::Unbanned
        } else {
            self
        }
    }

    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        match self {
            Self::BannedFinite { expires_at_ms, .. } => Some(expires_at_ms.saturating_sub(now_ms)),
            Self::Unbanned | Self::BannedPermanent { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::BannedFinite { reason, .. } | Self::BannedPermanent { reason } => Some(reason),
            Self::Unbanned => None,
        }
    }
}

/// Follows `bans/{uid}` and lifts an expired finite ban from this client.
pub struct BanMonitor {
    uid: UserId,
    clock: SharedClock,
    live: Arc<LiveValue<BanState>>,
    ticker: JoinHandle<()>,
}

impl BanMonitor {
    pub fn start(
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
        uid: UserId,
        tick: Duration,
    ) -> ModerationResult<Self> {
        let live = LiveValue::spawn(
            store.as_ref(),
            paths::ban(&uid),
            BanState::Unbanned,
            decode_ban,
        )
        .context(StorageSnafu {
            stage: "subscribe-ban",
        })?;
        let live = Arc::new(live);

        let ticker = tokio::spawn(run_expiry_ticker(
            store,
            clock.clone(),
            uid.clone(),
            tick,
            Arc::downgrade(&live),
        ));
        tracing::info!(%uid, "ban monitor started");
        Ok(Self {
            uid,
            clock,
            live,
            ticker,
        })
    }

    pub fn uid(&self) -> &UserId {
        &self.uid
    }

    /// Stored ban as it applies right now; the record may outlive its expiry until the
    /// ticker manages to remove it.
    pub fn state(&self) -> BanState {
        self.live.get().in_effect(self.clock.now_ms())
    }

    pub fn watch(&self) -> watch::Receiver<BanState> {
        self.live.watch()
    }
}

impl Drop for BanMonitor {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

fn decode_ban(snapshot: &Snapshot) -> BanState {
    match snapshot.decode::<BanRecord>() {
        Ok(record) => BanState::from_record(record.as_ref()),
        Err(error) => {
            tracing::warn!(%error, path = %snapshot.path, "ban record is malformed, ignoring");
            BanState::Unbanned
        }
    }
}

async fn run_expiry_ticker(
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    uid: UserId,
    tick: Duration,
    weak_live: Weak<LiveValue<BanState>>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(live) = weak_live.upgrade() else {
            break;
        };
        let state = live.get();
        drop(live);

        let now = clock.now_ms();
        if !state.is_expired(now) {
            continue;
        }
        if let Err(error) = lift_ban(store.as_ref(), &uid).await {
            tracing::warn!(%error, %uid, "failed to lift expired ban");
            continue;
        }
        tracing::info!(%uid, now, "expired ban lifted");
    }
}

/// Removes the ban record, then clears the profile flag.
pub(crate) async fn lift_ban(store: &dyn DocumentStore, uid: &UserId) -> ModerationResult<()> {
    store.remove(&paths::ban(uid)).await.context(StorageSnafu {
        stage: "remove-ban",
    })?;
    let mut fields = Map::new();
    fields.insert("banned".into(), Value::Bool(false));
    store
        .update(&paths::user(uid), fields)
        .await
        .context(StorageSnafu {
            stage: "clear-banned-flag",
        })
}

#[cfg(test)]
mod tests {
    use relay_storage::put;

    use super::*;
    use crate::testing::{Backend, TEST_START_MS, eventually};

    #[test]
    fn state_follows_the_record() {
        assert_eq!(BanState::from_record(None), BanState::Unbanned);
        let permanent = BanRecord {
            reason: "spam".into(),
            duration: 0,
            banned_at: 10,
        };
        let state = BanState::from_record(Some(&permanent));
        assert_eq!(state, BanState::BannedPermanent { reason: "spam".into() });
        assert!(!state.is_expired(u64::MAX));

        let finite = BanRecord {
            duration: 2,
            ..permanent
        };
        let state = BanState::from_record(Some(&finite));
        assert_eq!(state.remaining_ms(10), Some(120_000));
        assert!(!state.is_expired(120_009));
        assert!(state.is_expired(120_010));
        assert!(state.clone().in_effect(120_009).is_banned());
        assert_eq!(state.in_effect(120_010), BanState::Unbanned);
    }

    #[tokio::test(start_paused = true)]
    async fn finite_ban_is_lifted_at_expiry_and_not_before() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        put(
            &backend.store,
            &paths::ban(&uid),
            &BanRecord {
                reason: "flood".into(),
                duration: 1,
                banned_at: TEST_START_MS,
            },
        )
        .await
        .unwrap();
        let monitor = BanMonitor::start(
            backend.shared_store(),
            backend.clock.clone(),
            uid.clone(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(monitor.state().is_banned());

        backend.clock.advance(Duration::from_millis(59_999));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(monitor.state().is_banned());
        assert!(backend.store.value_at(&paths::ban(&uid)).is_some());

        backend.clock.advance(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        eventually(|| !monitor.state().is_banned()).await;
        assert!(backend.store.value_at(&paths::ban(&uid)).is_none());
        assert_eq!(
            backend.store.value_at(&paths::user(&uid)).unwrap()["banned"],
            Value::Bool(false)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_ban_stops_applying_while_its_removal_fails() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        put(
            &backend.store,
            &paths::ban(&uid),
            &BanRecord {
                reason: "flood".into(),
                duration: 1,
                banned_at: TEST_START_MS,
            },
        )
        .await
        .unwrap();
        let monitor = BanMonitor::start(
            backend.shared_store(),
            backend.clock.clone(),
            uid.clone(),
            Duration::from_secs(1),
        )
        .unwrap();
        backend.store.reject_writes_under(paths::ban(&uid));

        backend.clock.advance(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(backend.store.value_at(&paths::ban(&uid)).is_some());
        assert_eq!(monitor.state(), BanState::Unbanned);

        backend.store.clear_rejections();
        tokio::time::sleep(Duration::from_secs(2)).await;
        eventually(|| backend.store.value_at(&paths::ban(&uid)).is_none()).await;
        assert_eq!(monitor.state(), BanState::Unbanned);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_ban_survives_the_ticker() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        put(
            &backend.store,
            &paths::ban(&uid),
            &BanRecord {
                reason: "abuse".into(),
                duration: 0,
                banned_at: TEST_START_MS,
            },
        )
        .await
        .unwrap();
        let monitor = BanMonitor::start(
            backend.shared_store(),
            backend.clock.clone(),
            uid.clone(),
            Duration::from_secs(1),
        )
        .unwrap();

        backend.clock.advance(Duration::from_secs(365 * 24 * 3_600));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.state().reason(), Some("abuse"));
        assert!(backend.store.value_at(&paths::ban(&uid)).is_some());
    }
}
