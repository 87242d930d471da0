use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use relay_storage::{DocumentStore, SystemSettings, UserId};

use super::ban::{BanMonitor, BanState};
use super::error::ModerationResult;
use crate::auth::{AuthResult, AuthorizationContext};
use crate::clock::SharedClock;
use crate::settings::SystemSettingsWatch;

/// Top-level screen the client may show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UiMode {
    #[default]
    Normal,
    Maintenance,
    Banned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceNotice {
    pub message: String,
    pub estimate: Option<String>,
}

/// Ban wins over maintenance; the local admin flag only lifts maintenance.
pub fn select_mode(ban: &BanState, settings: &SystemSettings, admin_bypass: bool) -> UiMode {
    if ban.is_banned() {
        UiMode::Banned
    } else if settings.maintenance && !admin_bypass {
        UiMode::Maintenance
    } else {
        UiMode::Normal
    }
}

#[derive(Default)]
struct GateState {
    monitor: Option<BanMonitor>,
    last_mode: Option<UiMode>,
}

#[derive(Clone)]
pub struct ModerationGate {
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    ban_tick: Duration,
    system: SystemSettingsWatch,
    authorization: AuthorizationContext,
    state: Arc<Mutex<GateState>>,
}

impl ModerationGate {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
        ban_tick: Duration,
        system: SystemSettingsWatch,
        authorization: AuthorizationContext,
    ) -> Self {
        Self {
            store,
            clock,
            ban_tick,
            system,
            authorization,
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    /// Watches the ban record of `uid`; `None` stops watching.
    pub fn follow(&self, uid: Option<UserId>) -> ModerationResult<()> {
        let previous = self.lock().monitor.take();
        drop(previous);

        let Some(uid) = uid else {
            return Ok(());
        };
        let monitor = BanMonitor::start(self.store.clone(), self.clock.clone(), uid, self.ban_tick)?;
        self.lock().monitor = Some(monitor);
        Ok(())
    }

    pub fn ban_state(&self) -> BanState {
        self.lock()
            .monitor
            .as_ref()
            .map(BanMonitor::state)
            .unwrap_or_default()
    }

    pub fn mode(&self) -> UiMode {
        let ban = self.ban_state();
        let settings = self.system.current();
        let mode = select_mode(&ban, &settings, self.authorization.is_admin());

        let mut state = self.lock();
        if state.last_mode != Some(mode) {
            tracing::info!(previous = ?state.last_mode, current = ?mode, "ui mode changed");
            state.last_mode = Some(mode);
        }
        mode
    }

    pub fn maintenance_notice(&self) -> Option<MaintenanceNotice> {
        let settings = self.system.current();
        settings.maintenance.then(|| MaintenanceNotice {
            message: settings.maintenance_message.clone(),
            estimate: settings.maintenance_estimate.clone(),
        })
    }

    pub fn announcement(&self) -> Option<String> {
        self.system
            .current()
            .announcement
            .filter(|text| !text.trim().is_empty())
    }

    /// Escape hatch from the maintenance screen.
    pub fn try_admin_challenge(&self, attempt: &str) -> AuthResult<bool> {
        self.authorization.try_admin_challenge(attempt)
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
