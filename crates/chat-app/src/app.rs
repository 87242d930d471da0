//! Application wiring.
//!
//! `RelayApp` owns one instance of every view-model and keeps them pointed at the
//! signed-in user: a background task follows the identity provider and rebinds the chat
//! view and the moderation gate on every sign-in or sign-out.

use std::sync::Arc;

use relay_llm::{ModelCatalog, ResponderError, create_responder};
use relay_storage::{
    AuthUser, BlobStore, DocumentStore, IdentityProvider, MemoryBlobStore, MemoryIdentityProvider,
    MemoryStore, StorageError, UserId,
};
use snafu::{ResultExt, Snafu};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::admin::GodModeConsole;
use crate::auth::{
    AuthorizationContext, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, Onboarding,
    SignupWizard,
};
use crate::chat::{ChatError, ChatServices, ChatView, DelayWindow, ResponseSimulator};
use crate::clock::{SharedClock, SystemClock};
use crate::moderation::{ModerationError, ModerationGate, TicketDesk};
use crate::payment::Checkout;
use crate::settings::{ClientSettings, ClientSettingsStore, DisabledModels, SystemSettingsWatch};
use crate::status::StatusBoard;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to start live watch on `{stage}`: {source}"))]
    Watch {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to build responder on `{stage}`: {source}"))]
    Responder {
        stage: &'static str,
        source: ResponderError,
    },
    #[snafu(display("failed to bind chat view on `{stage}`: {source}"))]
    BindChat {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("failed to bind moderation gate on `{stage}`: {source}"))]
    BindGate {
        stage: &'static str,
        source: ModerationError,
    },
}

/// Remote collaborators plus where the operator flag is persisted.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: SharedClock,
    pub local: Arc<dyn KeyValueStore>,
}

impl Backends {
    /// Fully in-process stand-ins; the operator flag is kept on disk next to the settings.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            identity: Arc::new(MemoryIdentityProvider::new()),
            clock: Arc::new(SystemClock),
            local: Arc::new(FileKeyValueStore::new(FileKeyValueStore::default_path())),
        }
    }

    pub fn ephemeral() -> Self {
        Self {
            local: Arc::new(MemoryKeyValueStore::new()),
            ..Self::in_memory()
        }
    }
}

pub struct RelayApp {
    settings: Arc<ClientSettings>,
    backends: Backends,
    catalog: ModelCatalog,
    system: SystemSettingsWatch,
    disabled: DisabledModels,
    authorization: AuthorizationContext,
    chat: ChatView,
    onboarding: Onboarding,
    gate: ModerationGate,
    tickets: TicketDesk,
    checkout: Checkout,
    status: StatusBoard,
    console: GodModeConsole,
    identity_task: JoinHandle<()>,
}

impl RelayApp {
    /// Wires every view-model; must run inside a tokio runtime.
    pub fn start(settings: &ClientSettingsStore, backends: Backends) -> AppResult<Self> {
        let settings = settings.settings();
        let store = backends.store.clone();
        let clock = backends.clock.clone();

        let system = SystemSettingsWatch::start(store.as_ref()).context(WatchSnafu {
            stage: "watch-system-settings",
        })?;
        let disabled = DisabledModels::start(store.as_ref()).context(WatchSnafu {
            stage: "watch-disabled-models",
        })?;
        let authorization =
            AuthorizationContext::new(backends.local.clone(), settings.admin_passphrase.clone());

        let responder = create_responder(settings.responder_config()).context(ResponderSnafu {
            stage: "create-responder",
        })?;
        let (min, max) = settings.reply_delay_window();
        let simulator = ResponseSimulator::new(
            store.clone(),
            responder,
            clock.clone(),
            DelayWindow::new(min, max),
        );

        let chat = ChatView::new(
            ChatServices {
                store: store.clone(),
                blobs: backends.blobs.clone(),
                clock: clock.clone(),
                disabled: disabled.clone(),
                system: system.clone(),
                simulator: Arc::new(simulator),
            },
            settings.typing_tick(),
            settings.default_model.clone(),
        );
        chat.directory().set_locale(settings.locale);

        let gate = ModerationGate::new(
            store.clone(),
            clock.clone(),
            settings.ban_tick(),
            system.clone(),
            authorization.clone(),
        );
        let onboarding = Onboarding::new(
            backends.identity.clone(),
            store.clone(),
            clock.clone(),
            system.clone(),
        );
        let console = GodModeConsole::new(
            store.clone(),
            backends.blobs.clone(),
            clock.clone(),
            disabled.clone(),
            authorization.clone(),
            settings.typing_tick(),
        );

        let observer = backends.identity.observe();
        let current = backends.identity.current_user().map(|user| user.uid);
        bind_user(&chat, &gate, current)?;
        let identity_task = tokio::spawn(follow_identity(observer, chat.clone(), gate.clone()));

        tracing::info!(
            locale = settings.locale.as_tag(),
            default_model = %settings.default_model,
            "relay app started"
        );
        Ok(Self {
            tickets: TicketDesk::new(store.clone(), clock.clone()),
            checkout: Checkout::new(store.clone(), clock.clone(), system.clone()),
            status: StatusBoard::new(store, clock),
            catalog: ModelCatalog::default(),
            settings,
            backends,
            system,
            disabled,
            authorization,
            chat,
            onboarding,
            gate,
            console,
            identity_task,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn signup_wizard(&self) -> SignupWizard {
        SignupWizard::new(self.catalog.clone())
    }

    pub fn system(&self) -> &SystemSettingsWatch {
        &self.system
    }

    pub fn disabled_models(&self) -> &DisabledModels {
        &self.disabled
    }

    pub fn authorization(&self) -> &AuthorizationContext {
        &self.authorization
    }

    pub fn chat(&self) -> &ChatView {
        &self.chat
    }

    pub fn onboarding(&self) -> &Onboarding {
        &self.onboarding
    }

    pub fn gate(&self) -> &ModerationGate {
        &self.gate
    }

    pub fn tickets(&self) -> &TicketDesk {
        &self.tickets
    }

    pub fn checkout(&self) -> &Checkout {
        &self.checkout
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn console(&self) -> &GodModeConsole {
        &self.console
    }

    /// Rebinds immediately to whoever the provider reports as signed in.
    pub fn sync_identity(&self) -> AppResult<()> {
        let current = self.backends.identity.current_user().map(|user| user.uid);
        bind_user(&self.chat, &self.gate, current)
    }
}

impl Drop for RelayApp {
    fn drop(&mut self) {
        self.identity_task.abort();
        self.chat.stop();
        self.console.stop_observing();
    }
}

fn bind_user(chat: &ChatView, gate: &ModerationGate, uid: Option<UserId>) -> AppResult<()> {
    chat.set_user(uid.clone()).context(BindChatSnafu {
        stage: "bind-chat-user",
    })?;
    gate.follow(uid).context(BindGateSnafu {
        stage: "bind-gate-user",
    })
}

/// `observer` must be subscribed before the initial bind so no sign-in falls in between.
async fn follow_identity(
    mut observer: watch::Receiver<Option<AuthUser>>,
    chat: ChatView,
    gate: ModerationGate,
) {
    while observer.changed().await.is_ok() {
        let uid = observer.borrow_and_update().as_ref().map(|user| user.uid.clone());
        tracing::info!(uid = ?uid, "signed-in user changed");
        if let Err(error) = bind_user(&chat, &gate, uid) {
            tracing::warn!(%error, "failed to rebind to signed-in user");
        }
    }
    tracing::debug!("identity observer closed");
}

#[cfg(test)]
mod tests {
    use relay_storage::{UserProfile, fetch, paths};

    use super::*;
    use crate::chat::{ComposerInput, ReplyOutcome};
    use crate::locale::Locale;
    use crate::moderation::UiMode;
    use crate::testing::eventually;

    fn quick_settings() -> ClientSettingsStore {
        ClientSettingsStore::in_memory(ClientSettings {
            typing_tick_ms: 1,
            reply_delay_min_ms: 10,
            reply_delay_max_ms: 10,
            admin_passphrase: "letmein".into(),
            ..ClientSettings::default()
        })
    }

    async fn sign_up(app: &RelayApp) -> UserProfile {
        let mut wizard = app.signup_wizard();
        wizard
            .submit_credentials("ada@relay.dev", "secret1", "secret1")
            .unwrap();
        wizard.submit_profile("Ada", "ada").unwrap();
        let model = app.catalog().models[0].id.clone();
        wizard.submit_preferences(&model, Locale::En).unwrap();
        app.onboarding().complete_signup(&wizard).await.unwrap()
    }

    #[tokio::test]
    async fn sign_in_binds_chat_and_gate_to_the_user() {
        let app = RelayApp::start(&quick_settings(), Backends::ephemeral()).unwrap();
        assert_eq!(app.chat().uid(), None);

        let profile = sign_up(&app).await;
        eventually(|| app.chat().uid() == Some(profile.uid.clone())).await;
        assert_eq!(app.gate().mode(), UiMode::Normal);

        app.onboarding().sign_out().await.unwrap();
        eventually(|| app.chat().uid().is_none()).await;
    }

    #[tokio::test]
    async fn sign_in_before_the_follower_runs_is_not_lost() {
        let backends = Backends::ephemeral();
        let identity = backends.identity.clone();
        let app = RelayApp::start(&quick_settings(), backends).unwrap();

        let user = identity
            .sign_up_with_email("early@relay.dev", "secret1")
            .await
            .unwrap();
        eventually(|| app.chat().uid() == Some(user.uid.clone())).await;

        app.sync_identity().unwrap();
        assert_eq!(app.chat().uid(), Some(user.uid));
    }

    #[tokio::test]
    async fn first_message_gets_a_simulated_reply() {
        let app = RelayApp::start(&quick_settings(), Backends::ephemeral()).unwrap();
        let profile = sign_up(&app).await;
        eventually(|| app.chat().uid() == Some(profile.uid.clone())).await;

        let receipt = app.chat().send_message(ComposerInput::text("Hello")).await.unwrap();
        let outcome = app.chat().wait_for_reply().await.unwrap();
        assert!(matches!(outcome, Some(ReplyOutcome::Replied(_))));

        let stored: UserProfile = fetch(app.backends().store.as_ref(), &paths::user(&profile.uid))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.request_count, 1);
        eventually(|| app.chat().stream().messages().len() == 2).await;
        assert_eq!(app.chat().active_session(), Some(receipt.session_id));
    }

    #[tokio::test]
    async fn console_follows_the_local_operator_flag() {
        let app = RelayApp::start(&quick_settings(), Backends::ephemeral()).unwrap();
        assert!(!app.console().is_available());
        assert!(app.gate().try_admin_challenge("letmein").unwrap());
        assert!(app.console().is_available());

        app.console().set_maintenance(true, "Upgrading", None).await.unwrap();
        eventually(|| app.system().current().maintenance).await;
        assert_eq!(app.gate().mode(), UiMode::Normal);
        app.authorization().revoke().unwrap();
        assert_eq!(app.gate().mode(), UiMode::Maintenance);
        assert!(app.status().record_visit().await.is_ok());
    }
}
