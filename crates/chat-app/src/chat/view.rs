//! Coordinator behind the chat screen.
//!
//! `ChatView` binds one signed-in user to a [`SessionDirectory`] and a [`MessageStream`],
//! owns the composer's model selection and runs the send pipeline: validation, quota,
//! optional image upload, the user message write and the hand-off to the
//! [`ResponseSimulator`]. At most one reply is pending per view; switching sessions,
//! sending again or pressing stop cancels it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use relay_storage::{
    BlobStore, DEFAULT_SESSION_TITLE, DocumentStore, FolderId, MessageId, MessageRole, NewMessage, Plan,
    SessionId, SessionPatch, SessionRecord, UserId, UserProfile, append, fetch, paths,
};
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::directory::{FolderDeleteMode, SessionDirectory};
use super::error::{
    ChatResult, EmptyMessageSnafu, ModelDisabledSnafu, NotSignedInSnafu, NothingToSendSnafu,
    QuotaExceededSnafu, SessionNotFoundSnafu, StorageSnafu,
};
use super::simulator::{ReplyOutcome, ReplyTurn, ResponseSimulator};
use super::stream::{MessageStream, StreamTarget};
use crate::clock::SharedClock;
use crate::settings::{DisabledModels, SystemSettingsWatch};

const TITLE_MAX_CHARS: usize = 40;
const CHAT_IMAGE_PREFIX: &str = "chat-images";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposerInput {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl ComposerInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub image_url: Option<String>,
}

/// What the composer needs to render its controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposerState {
    pub model: String,
    pub model_disabled: bool,
    pub reply_pending: bool,
    pub typing: bool,
}

/// Collaborators shared by every view of one app instance.
#[derive(Clone)]
pub struct ChatServices {
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub clock: SharedClock,
    pub disabled: DisabledModels,
    pub system: SystemSettingsWatch,
    pub simulator: Arc<ResponseSimulator>,
}

struct PendingReply {
    token: CancellationToken,
    handle: JoinHandle<ChatResult<ReplyOutcome>>,
}

impl PendingReply {
    fn cancel(&self) {
        self.token.cancel();
    }
}

struct ViewState {
    uid: Option<UserId>,
    active: Option<SessionId>,
    model: String,
    pending: Option<PendingReply>,
}

impl ViewState {
    fn cancel_pending(&self) {
        if let Some(pending) = &self.pending {
            pending.cancel();
        }
    }
}

impl Drop for ViewState {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[derive(Clone)]
pub struct ChatView {
    services: ChatServices,
    directory: SessionDirectory,
    stream: MessageStream,
    state: Arc<Mutex<ViewState>>,
}

impl ChatView {
    pub fn new(services: ChatServices, typing_tick: Duration, default_model: impl Into<String>) -> Self {
        let directory = SessionDirectory::new(
            services.store.clone(),
            services.disabled.clone(),
            services.clock.clone(),
        );
        let stream = MessageStream::new(services.store.clone(), typing_tick);
        Self {
            services,
            directory,
            stream,
            state: Arc::new(Mutex::new(ViewState {
                uid: None,
                active: None,
                model: default_model.into(),
                pending: None,
            })),
        }
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    pub fn stream(&self) -> &MessageStream {
        &self.stream
    }

    pub fn uid(&self) -> Option<UserId> {
        self.lock().uid.clone()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.lock().active.clone()
    }

    /// Follows `uid`, or tears everything down on sign-out.
    pub fn set_user(&self, uid: Option<UserId>) -> ChatResult<()> {
        {
            let mut state = self.lock();
            if state.uid == uid {
                return Ok(());
            }
            state.cancel_pending();
            state.active = None;
            state.uid = uid.clone();
        }
        self.stream.close();
        match uid {
            Some(uid) => self.directory.watch(uid),
            None => {
                self.directory.stop();
                Ok(())
            }
        }
    }

    pub fn select_session(&self, session_id: &SessionId) -> ChatResult<()> {
        let uid = self.require_uid("select-session")?;
        let model = self.directory.session(session_id).map(|session| session.model);
        {
            let mut state = self.lock();
            state.cancel_pending();
            state.active = Some(session_id.clone());
            if let Some(model) = model {
                state.model = model;
            }
        }
        self.stream
            .open(StreamTarget::new(uid, session_id.clone()))
    }

    /// Leaves the open session; the next send creates a fresh one.
    pub fn new_chat(&self) {
        {
            let mut state = self.lock();
            state.cancel_pending();
            state.active = None;
        }
        self.stream.close();
    }

    /// Changes the composer model; an open session is switched along with it.
    pub async fn select_model(&self, model: &str) -> ChatResult<()> {
        if let Some(session_id) = self.active_session() {
            self.directory.change_session_model(&session_id, model).await?;
        }
        self.lock().model = model.to_string();
        tracing::debug!(model, "composer model selected");
        Ok(())
    }

    pub fn composer_state(&self) -> ComposerState {
        let (model, reply_pending) = {
            let state = self.lock();
            let model = state
                .active
                .as_ref()
                .and_then(|session_id| self.directory.session(session_id))
                .map(|session| session.model)
                .unwrap_or_else(|| state.model.clone());
            let reply_pending = state
                .pending
                .as_ref()
                .is_some_and(|pending| !pending.handle.is_finished());
            (model, reply_pending)
        };
        ComposerState {
            model_disabled: self.directory.is_model_disabled(&model),
            model,
            reply_pending,
            typing: !self.stream.typing().is_idle(),
        }
    }

    pub async fn delete_session(&self, session_id: &SessionId) -> ChatResult<()> {
        if self.active_session().as_ref() == Some(session_id) {
            self.new_chat();
        }
        self.directory.delete_session(session_id).await
    }

    /// Deletes a folder; a cascade that takes the open session along leaves it first.
    pub async fn delete_folder(&self, folder_id: &FolderId, mode: FolderDeleteMode) -> ChatResult<()> {
        if matches!(mode, FolderDeleteMode::Cascade) {
            let active_in_folder = self
                .active_session()
                .and_then(|session_id| self.directory.session(&session_id))
                .is_some_and(|session| session.folder_id.as_ref() == Some(folder_id));
            if active_in_folder {
                self.new_chat();
            }
        }
        self.directory.delete_folder(folder_id, mode).await
    }

    /// Cancels a reply that has not landed yet and finishes any running reveal at once.
    pub fn stop(&self) {
        self.lock().cancel_pending();
        self.stream.stop_typing();
    }

    /// Runs the send pipeline and schedules the simulated reply.
    ///
    /// Returns once the user message and its metadata are written; the reply arrives
    /// through the message stream later.
    pub async fn send_message(&self, input: ComposerInput) -> ChatResult<SendReceipt> {
        let uid = self.require_uid("send-message")?;
        let text = input.text.trim().to_string();
        ensure!(
            !text.is_empty() || input.image.is_some(),
            EmptyMessageSnafu {
                stage: "send-validate",
            }
        );
        self.settle_pending().await;

        let (active, model) = {
            let state = self.lock();
            (state.active.clone(), state.model.clone())
        };
        let model = active
            .as_ref()
            .and_then(|session_id| self.directory.session(session_id))
            .map(|session| session.model)
            .unwrap_or(model);
        ensure!(
            !self.directory.is_model_disabled(&model),
            ModelDisabledSnafu {
                stage: "send-model",
                model_id: model.clone(),
            }
        );

        let profile = self.check_quota(&uid).await?;

        let session_id = match active {
            Some(session_id) => session_id,
            None => {
                let title = session_title(&text);
                let session_id = self.directory.create_session(Some(&title), &model).await?;
                self.lock().active = Some(session_id.clone());
                session_id
            }
        };
        let target = StreamTarget::new(uid.clone(), session_id.clone());
        if self.stream.target().as_ref() != Some(&target) {
            self.stream.open(target.clone())?;
        }

        let image_url = match &input.image {
            Some(image) => self.upload_image(&uid, image).await,
            None => None,
        };
        ensure!(
            !text.is_empty() || image_url.is_some(),
            NothingToSendSnafu {
                stage: "send-after-upload",
            }
        );

        // Read after the upload; writes that landed meanwhile must be counted.
        let baseline = fetch::<SessionRecord>(
            self.services.store.as_ref(),
            &paths::chat(&uid, &session_id),
        )
        .await
        .context(StorageSnafu {
            stage: "send-read-session",
        })?
        .context(SessionNotFoundSnafu {
            stage: "send-read-session",
            session_id: session_id.as_str(),
        })?
        .message_count;

        let now = self.services.clock.now_ms();
        let message = NewMessage {
            role: MessageRole::User,
            content: (!text.is_empty()).then(|| text.clone()),
            model: model.clone(),
            timestamp: now,
            image_url: image_url.clone(),
        }
        .into_record();
        let key = append(
            self.services.store.as_ref(),
            &paths::messages(&uid, &session_id),
            &message,
        )
        .await
        .context(StorageSnafu {
            stage: "send-append-message",
        })?;
        let message_id = MessageId::new(key);

        let patch = SessionPatch {
            last_message: Some(now),
            message_count: Some(baseline.saturating_add(1)),
            ..SessionPatch::default()
        };
        self.services
            .store
            .update(&paths::chat(&uid, &session_id), patch.into_fields())
            .await
            .context(StorageSnafu {
                stage: "send-update-session",
            })?;

        let mut counter = Map::new();
        counter.insert(
            "requestCount".into(),
            Value::from(profile.request_count.saturating_add(1)),
        );
        self.services
            .store
            .update(&paths::user(&uid), counter)
            .await
            .context(StorageSnafu {
                stage: "send-count-request",
            })?;
        tracing::info!(%uid, %session_id, %message_id, model, baseline, "user message sent");

        self.schedule_reply(
            target,
            ReplyTurn {
                uid,
                session_id: session_id.clone(),
                model,
                prompt: (!text.is_empty()).then_some(text),
                has_image: image_url.is_some(),
                baseline_count: baseline,
            },
        );

        Ok(SendReceipt {
            session_id,
            message_id,
            image_url,
        })
    }

    /// Waits for the pending reply, if any. A reply torn down by a switch counts as cancelled.
    pub async fn wait_for_reply(&self) -> ChatResult<Option<ReplyOutcome>> {
        let pending = self.lock().pending.take();
        let Some(pending) = pending else {
            return Ok(None);
        };
        match pending.handle.await {
            Ok(outcome) => outcome.map(Some),
            Err(error) => {
                tracing::warn!(%error, "reply task did not complete");
                Ok(Some(ReplyOutcome::Cancelled))
            }
        }
    }

    /// Cancels the previous reply and waits until its task has finished writing, then ends
    /// any reveal it started.
    async fn settle_pending(&self) {
        let pending = self.lock().pending.take();
        if let Some(pending) = pending {
            pending.cancel();
            if let Err(error) = pending.handle.await {
                tracing::debug!(%error, "previous reply task did not complete");
            }
        }
        self.stream.stop_typing();
    }

    fn schedule_reply(&self, target: StreamTarget, turn: ReplyTurn) {
        let token = CancellationToken::new();
        let simulator = self.services.simulator.clone();
        let stream = self.stream.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = simulator.reply(turn, task_token.clone()).await;
            match &outcome {
                Ok(ReplyOutcome::Replied(message_id)) if !task_token.is_cancelled() => {
                    if let Err(error) = stream.begin_typing(&target, message_id.clone()) {
                        tracing::warn!(%error, %message_id, "typing animation not started");
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%error, session_id = %target.session_id, "simulated reply failed");
                }
            }
            outcome
        });
        self.lock().pending = Some(PendingReply { token, handle });
    }

    async fn check_quota(&self, uid: &UserId) -> ChatResult<UserProfile> {
        let profile = fetch::<UserProfile>(self.services.store.as_ref(), &paths::user(uid))
            .await
            .context(StorageSnafu {
                stage: "send-read-profile",
            })?
            .unwrap_or_else(|| UserProfile {
                uid: uid.clone(),
                ..default_profile()
            });
        let limit = self.services.system.current().free_request_limit;
        ensure!(
            profile.plan != Plan::Free || profile.request_count < limit,
            QuotaExceededSnafu {
                stage: "send-quota",
                limit,
            }
        );
        Ok(profile)
    }

    async fn upload_image(&self, uid: &UserId, image: &ImageAttachment) -> Option<String> {
        let path = chat_image_path(uid, self.services.clock.now_ms(), &image.file_name);
        match self
            .services
            .blobs
            .upload(&path, image.bytes.clone(), &image.content_type)
            .await
        {
            Ok(url) => Some(url),
            Err(error) => {
                tracing::warn!(%error, %uid, path, "image upload failed, sending without it");
                None
            }
        }
    }

    fn require_uid(&self, stage: &'static str) -> ChatResult<UserId> {
        self.uid().context(NotSignedInSnafu { stage })
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn default_profile() -> UserProfile {
    UserProfile {
        uid: UserId::default(),
        display_name: String::new(),
        visible_nick: String::new(),
        email: String::new(),
        plan: Plan::Free,
        role: Default::default(),
        banned: false,
        unique_id: String::new(),
        last_login: 0,
        created_at: 0,
        request_count: 0,
        preferred_model: None,
        locale: None,
    }
}

/// Title for a session created by its first message.
pub fn session_title(text: &str) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return DEFAULT_SESSION_TITLE.to_string();
    }
    if text.chars().count() <= TITLE_MAX_CHARS {
        return text;
    }
    let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
    title.truncate(title.trim_end().len());
    title.push_str("...");
    title
}

pub fn chat_image_path(uid: &UserId, now_ms: u64, file_name: &str) -> String {
    let name: String = file_name
        .trim()
        .chars()
        .map(|ch| if ch == '/' || ch == '\\' { '_' } else { ch })
        .collect();
    let name = if name.is_empty() || name == "." || name == ".." {
        "image".to_string()
    } else {
        name
    };
    format!("{CHAT_IMAGE_PREFIX}/{uid}/{now_ms}_{name}")
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use relay_llm::CannedResponder;
    use relay_storage::{MemoryBlobStore, MessageRecord, StorageResult, fetch_records, put};
    use serde_json::json;

    use super::*;
    use crate::chat::ChatError;
    use crate::chat::simulator::DelayWindow;
    use crate::testing::{Backend, eventually};

    /// Holds every upload for `delay` before handing it to the in-memory store.
    struct SlowBlobStore {
        inner: Arc<MemoryBlobStore>,
        delay: Duration,
    }

    impl BlobStore for SlowBlobStore {
        fn upload<'a>(
            &'a self,
            path: &'a str,
            bytes: Vec<u8>,
            content_type: &'a str,
        ) -> BoxFuture<'a, StorageResult<String>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.upload(path, bytes, content_type).await
            })
        }
    }

    fn chat_view(backend: &Backend) -> ChatView {
        chat_view_with_blobs(backend, backend.blobs.clone())
    }

    fn chat_view_with_blobs(backend: &Backend, blobs: Arc<dyn BlobStore>) -> ChatView {
        let store = backend.shared_store();
        let responder = CannedResponder::with_seed(vec!["Hi there".into()], 1).unwrap();
        let simulator = ResponseSimulator::new(
            store.clone(),
            Arc::new(responder),
            backend.clock.clone(),
            DelayWindow::new(Duration::from_millis(600), Duration::from_millis(1_400)),
        )
        .with_seed(5);
        let services = ChatServices {
            store,
            blobs,
            clock: backend.clock.clone(),
            disabled: DisabledModels::start(&backend.store).unwrap(),
            system: SystemSettingsWatch::start(&backend.store).unwrap(),
            simulator: Arc::new(simulator),
        };
        ChatView::new(services, Duration::from_millis(30), "gpt-4o")
    }

    fn session_record(backend: &Backend, uid: &UserId, session_id: &SessionId) -> SessionRecord {
        serde_json::from_value(backend.store.value_at(&paths::chat(uid, session_id)).unwrap()).unwrap()
    }

    #[test]
    fn titles_are_trimmed_and_shortened() {
        assert_eq!(session_title("  Hello   world "), "Hello world");
        assert_eq!(session_title(""), DEFAULT_SESSION_TITLE);
        let long = "word ".repeat(20);
        let title = session_title(&long);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn image_paths_stay_under_the_user_prefix() {
        let uid = UserId::new("u1");
        assert_eq!(chat_image_path(&uid, 7, "cat.png"), "chat-images/u1/7_cat.png");
        assert_eq!(chat_image_path(&uid, 7, "../x/y.png"), "chat-images/u1/7_.._x_y.png");
        assert_eq!(chat_image_path(&uid, 7, " "), "chat-images/u1/7_image");
    }

    #[tokio::test(start_paused = true)]
    async fn hello_creates_a_session_and_gets_one_reply() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let view = chat_view(&backend);
        view.set_user(Some(uid.clone())).unwrap();

        let receipt = view.send_message(ComposerInput::text("Hello")).await.unwrap();
        let session_id = receipt.session_id.clone();
        assert_eq!(view.active_session(), Some(session_id.clone()));

        let record = session_record(&backend, &uid, &session_id);
        assert_eq!(record.title, "Hello");
        assert_eq!(record.model, "gpt-4o");
        assert_eq!(record.message_count, 1);
        assert!(view.composer_state().reply_pending);

        let outcome = view.wait_for_reply().await.unwrap();
        assert!(matches!(outcome, Some(ReplyOutcome::Replied(_))));
        assert_eq!(session_record(&backend, &uid, &session_id).message_count, 2);

        let messages: Vec<MessageRecord> =
            fetch_records(&backend.store, &paths::messages(&uid, &session_id)).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content_str(), "Hello");
        assert_eq!(messages[1].role, MessageRole::Assistant);

        tokio::time::sleep(Duration::from_secs(2)).await;
        eventually(|| view.stream().typing().is_idle() && view.stream().view().len() == 2).await;
        let shown = view.stream().view();
        assert_eq!(shown[1].content, "Hi there");
        assert!(!shown[1].typing);

        let profile: Value = backend.store.value_at(&paths::user(&uid)).unwrap();
        assert_eq!(profile["requestCount"], json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_the_reply_leaves_only_the_user_message() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let view = chat_view(&backend);
        view.set_user(Some(uid.clone())).unwrap();

        let receipt = view.send_message(ComposerInput::text("Hello")).await.unwrap();
        view.stop();
        assert_eq!(view.wait_for_reply().await.unwrap(), Some(ReplyOutcome::Cancelled));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let messages: Vec<MessageRecord> =
            fetch_records(&backend.store, &paths::messages(&uid, &receipt.session_id))
                .await
                .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(session_record(&backend, &uid, &receipt.session_id).message_count, 1);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_writes() {
        let backend = Backend::new();
        let view = chat_view(&backend);
        view.set_user(Some(UserId::new("u1"))).unwrap();

        let error = view.send_message(ComposerInput::text("   ")).await.unwrap_err();
        assert!(matches!(error, ChatError::EmptyMessage { .. }));
        assert_eq!(backend.store.write_count(), 0);
    }

    #[tokio::test]
    async fn sending_requires_a_user() {
        let backend = Backend::new();
        let view = chat_view(&backend);
        let error = view.send_message(ComposerInput::text("Hi")).await.unwrap_err();
        assert!(matches!(error, ChatError::NotSignedIn { .. }));
    }

    #[tokio::test]
    async fn disabled_model_flags_the_composer_and_blocks_sending() {
        let backend = Backend::new();
        backend
            .store
            .set(&paths::disabled_model("gpt-4o").unwrap(), json!(true))
            .await
            .unwrap();
        let view = chat_view(&backend);
        view.set_user(Some(UserId::new("u1"))).unwrap();

        assert!(view.composer_state().model_disabled);
        let error = view.send_message(ComposerInput::text("Hi")).await.unwrap_err();
        assert!(matches!(error, ChatError::ModelDisabled { .. }));
        assert!(backend.store.value_at(&paths::chats(&UserId::new("u1"))).is_none());
    }

    #[tokio::test]
    async fn free_plan_at_the_limit_cannot_send() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        put(
            &backend.store,
            &paths::user(&uid),
            &UserProfile {
                request_count: 20,
                ..default_profile()
            },
        )
        .await
        .unwrap();
        let view = chat_view(&backend);
        view.set_user(Some(uid.clone())).unwrap();

        let error = view.send_message(ComposerInput::text("Hi")).await.unwrap_err();
        assert!(matches!(error, ChatError::QuotaExceeded { limit: 20, .. }));
        assert!(backend.store.value_at(&paths::chats(&uid)).is_none());

        backend
            .store
            .update(&paths::user(&uid), Map::from_iter([("plan".into(), json!("pro"))]))
            .await
            .unwrap();
        view.send_message(ComposerInput::text("Hi")).await.unwrap();
        view.stop();
    }

    #[tokio::test]
    async fn failed_upload_without_text_has_nothing_to_send() {
        let backend = Backend::new();
        backend.blobs.set_offline(true);
        let uid = UserId::new("u1");
        let view = chat_view(&backend);
        view.set_user(Some(uid.clone())).unwrap();
        let image = ImageAttachment {
            file_name: "cat.png".into(),
            content_type: "image/png".into(),
            bytes: vec![1, 2, 3],
        };

        let error = view
            .send_message(ComposerInput::default().with_image(image.clone()))
            .await
            .unwrap_err();
        assert!(matches!(error, ChatError::NothingToSend { .. }));

        let receipt = view
            .send_message(ComposerInput::text("look").with_image(image))
            .await
            .unwrap();
        view.stop();
        assert_eq!(receipt.image_url, None);
        let messages: Vec<MessageRecord> =
            fetch_records(&backend.store, &paths::messages(&uid, &receipt.session_id))
                .await
                .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].image_url, None);
    }

    #[tokio::test]
    async fn uploaded_image_is_attached_to_the_message() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let view = chat_view(&backend);
        view.set_user(Some(uid.clone())).unwrap();

        let receipt = view
            .send_message(ComposerInput::default().with_image(ImageAttachment {
                file_name: "cat.png".into(),
                content_type: "image/png".into(),
                bytes: vec![9],
            }))
            .await
            .unwrap();
        view.stop();

        let url = receipt.image_url.unwrap();
        assert!(url.contains("chat-images/u1/"));
        assert_eq!(backend.blobs.len(), 1);
        assert_eq!(
            session_record(&backend, &uid, &receipt.session_id).title,
            DEFAULT_SESSION_TITLE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn switching_sessions_cancels_the_pending_reply() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let other = backend
            .seed_session(&uid, "other", crate::testing::session("Other", 1, 0))
            .await;
        let view = chat_view(&backend);
        view.set_user(Some(uid.clone())).unwrap();

        let receipt = view.send_message(ComposerInput::text("Hello")).await.unwrap();
        eventually(|| view.directory().session(&other).is_some()).await;
        view.select_session(&other).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(session_record(&backend, &uid, &receipt.session_id).message_count, 1);
        assert_eq!(view.stream().target().unwrap().session_id, other);
        assert!(view.stream().messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn message_count_matches_messages_when_sending_during_a_slow_upload() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let blobs = Arc::new(SlowBlobStore {
            inner: backend.blobs.clone(),
            delay: Duration::from_secs(3),
        });
        let view = chat_view_with_blobs(&backend, blobs);
        view.set_user(Some(uid.clone())).unwrap();

        let first = view.send_message(ComposerInput::text("first")).await.unwrap();
        let second = view
            .send_message(ComposerInput::text("second").with_image(ImageAttachment {
                file_name: "cat.png".into(),
                content_type: "image/png".into(),
                bytes: vec![1],
            }))
            .await
            .unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert!(second.image_url.is_some());
        view.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let messages: Vec<MessageRecord> =
            fetch_records(&backend.store, &paths::messages(&uid, &first.session_id))
                .await
                .unwrap();
        let record = session_record(&backend, &uid, &first.session_id);
        assert_eq!(record.message_count, messages.len() as u64);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|message| message.role == MessageRole::User));
    }

    #[tokio::test(start_paused = true)]
    async fn sending_again_lets_a_landing_reply_finish_first() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let view = chat_view(&backend);
        view.set_user(Some(uid.clone())).unwrap();

        let first = view.send_message(ComposerInput::text("first")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        view.send_message(ComposerInput::text("second")).await.unwrap();
        view.wait_for_reply().await.unwrap();

        let messages: Vec<MessageRecord> =
            fetch_records(&backend.store, &paths::messages(&uid, &first.session_id))
                .await
                .unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(
            session_record(&backend, &uid, &first.session_id).message_count,
            4
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cascading_folder_delete_leaves_the_open_session_without_a_reply() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let view = chat_view(&backend);
        view.set_user(Some(uid.clone())).unwrap();

        let receipt = view.send_message(ComposerInput::text("Hello")).await.unwrap();
        let folder = view.directory().create_folder(Some("Work")).await.unwrap();
        eventually(|| view.directory().session(&receipt.session_id).is_some()).await;
        view.directory()
            .assign_folder(&receipt.session_id, Some(folder.clone()))
            .await
            .unwrap();
        eventually(|| {
            view.directory()
                .session(&receipt.session_id)
                .is_some_and(|session| session.folder_id.as_ref() == Some(&folder))
        })
        .await;

        view.delete_folder(&folder, FolderDeleteMode::Cascade).await.unwrap();
        assert_eq!(view.active_session(), None);
        let outcome = view.wait_for_reply().await.unwrap();
        assert!(matches!(
            outcome,
            Some(ReplyOutcome::Cancelled | ReplyOutcome::SessionGone)
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backend.store.value_at(&paths::chat(&uid, &receipt.session_id)).is_none());
        assert!(
            backend
                .store
                .value_at(&paths::messages(&uid, &receipt.session_id))
                .is_none()
        );
    }
}
