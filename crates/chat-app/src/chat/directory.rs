//! Live, locally sorted view of one user's sessions and folders.
//!
//! The directory keeps the last snapshot of `chats/{uid}` and `folders/{uid}` and derives
//! every presentation (sort, filter, folder partition) from that cache, so switching sort
//! mode or typing a query never touches the store. All mutations are direct writes; the
//! cache only changes when the resulting snapshot comes back.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::StreamExt;
use relay_storage::{
    DEFAULT_FOLDER_NAME, DEFAULT_SESSION_TITLE, DocumentStore, FolderId, FolderRecord,
    SessionId, SessionPatch, SessionRecord, Subscription, UserId, append, paths,
};
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::error::{
    ChatResult, EmptyNameSnafu, FolderNotFoundSnafu, ModelDisabledSnafu, NotSignedInSnafu,
    SessionNotFoundSnafu, StorageSnafu,
};
use crate::clock::SharedClock;
use crate::locale::{Locale, collate};
use crate::settings::DisabledModels;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortMode {
    #[default]
    Recent,
    Alphabetical,
    MessageCount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewOptions {
    pub sort: SortMode,
    pub query: String,
    pub locale: Locale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderGroup {
    pub folder: FolderRecord,
    pub sessions: Vec<SessionRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryView {
    pub folders: Vec<FolderGroup>,
    pub unfiled: Vec<SessionRecord>,
}

impl DirectoryView {
    pub fn session_count(&self) -> usize {
        self.unfiled.len()
            + self
                .folders
                .iter()
                .map(|group| group.sessions.len())
                .sum::<usize>()
    }
}

/// Case-insensitive substring match; a blank query matches everything.
pub fn matches_query(title: &str, query: &str) -> bool {
    let query = query.trim();
    query.is_empty() || title.to_lowercase().contains(&query.to_lowercase())
}

pub fn sort_sessions(sessions: &mut [SessionRecord], sort: SortMode, locale: Locale) {
    match sort {
        SortMode::Recent => sessions.sort_by(|left, right| {
            right
                .last_message
                .cmp(&left.last_message)
                .then_with(|| right.created_at.cmp(&left.created_at))
                .then_with(|| left.id.cmp(&right.id))
        }),
        SortMode::Alphabetical => sessions.sort_by(|left, right| {
            collate(locale, &left.title, &right.title).then_with(|| left.id.cmp(&right.id))
        }),
        SortMode::MessageCount => sessions.sort_by(|left, right| {
            right
                .message_count
                .cmp(&left.message_count)
                .then_with(|| right.last_message.cmp(&left.last_message))
                .then_with(|| left.id.cmp(&right.id))
        }),
    }
}

/// Partitions sessions into folder groups and the unfiled group.
///
/// Sessions pointing at a folder that no longer exists are shown as unfiled. With a
/// non-blank query, folders without a matching session are hidden.
pub fn build_view(
    sessions: &[SessionRecord],
    folders: &[FolderRecord],
    options: &ViewOptions,
) -> DirectoryView {
    let mut visible = sessions
        .iter()
        .filter(|session| matches_query(&session.title, &options.query))
        .cloned()
        .collect::<Vec<_>>();
    sort_sessions(&mut visible, options.sort, options.locale);

    let mut ordered_folders = folders.to_vec();
    match options.sort {
        SortMode::Alphabetical => ordered_folders.sort_by(|left, right| {
            collate(options.locale, &left.name, &right.name).then_with(|| left.id.cmp(&right.id))
        }),
        SortMode::Recent | SortMode::MessageCount => ordered_folders.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        }),
    }

    let mut groups = ordered_folders
        .into_iter()
        .map(|folder| FolderGroup {
            folder,
            sessions: Vec::new(),
        })
        .collect::<Vec<_>>();
    let mut unfiled = Vec::new();

    for session in visible {
        let position = session.folder_id.as_ref().and_then(|folder_id| {
            groups
                .iter()
                .position(|group| &group.folder.id == folder_id)
        });
        match position {
            Some(index) => groups[index].sessions.push(session),
            None => unfiled.push(session),
        }
    }

    if !options.query.trim().is_empty() {
        groups.retain(|group| !group.sessions.is_empty());
    }

    DirectoryView {
        folders: groups,
        unfiled,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    Session(SessionId),
    Folder(FolderId),
    Unfiled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropPlan {
    NoOp,
    /// Both sessions move into one new folder.
    CreateFolder {
        dragged: SessionId,
        target: SessionId,
    },
    MoveToFolder {
        session: SessionId,
        folder: FolderId,
    },
    ClearFolder {
        session: SessionId,
    },
}

/// Decides what dropping `dragged` onto `target` means, without writing anything.
pub fn plan_drop(
    sessions: &[SessionRecord],
    folders: &[FolderRecord],
    dragged: &SessionId,
    target: &DropTarget,
) -> DropPlan {
    let Some(source) = sessions.iter().find(|session| &session.id == dragged) else {
        return DropPlan::NoOp;
    };

    match target {
        DropTarget::Session(target_id) => {
            if target_id == dragged {
                return DropPlan::NoOp;
            }
            let Some(target) = sessions.iter().find(|session| &session.id == target_id) else {
                return DropPlan::NoOp;
            };
            if source.folder_id.is_some() && source.folder_id == target.folder_id {
                return DropPlan::NoOp;
            }
            DropPlan::CreateFolder {
                dragged: dragged.clone(),
                target: target_id.clone(),
            }
        }
        DropTarget::Folder(folder_id) => {
            let known = folders.iter().any(|folder| &folder.id == folder_id);
            if !known || source.folder_id.as_ref() == Some(folder_id) {
                return DropPlan::NoOp;
            }
            DropPlan::MoveToFolder {
                session: dragged.clone(),
                folder: folder_id.clone(),
            }
        }
        DropTarget::Unfiled => {
            if source.folder_id.is_none() {
                return DropPlan::NoOp;
            }
            DropPlan::ClearFolder {
                session: dragged.clone(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderDeleteMode {
    /// Sessions stay and lose their folder.
    Scatter,
    /// Sessions and their messages are deleted with the folder.
    Cascade,
}

#[derive(Debug, Clone, Copy)]
enum Feed {
    Sessions,
    Folders,
}

#[derive(Default)]
struct DirectoryState {
    uid: Option<UserId>,
    generation: u64,
    sessions: Vec<SessionRecord>,
    folders: Vec<FolderRecord>,
    options: ViewOptions,
    pumps: Vec<JoinHandle<()>>,
}

impl DirectoryState {
    fn stop_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Drop for DirectoryState {
    fn drop(&mut self) {
        self.stop_pumps();
    }
}

#[derive(Clone)]
pub struct SessionDirectory {
    store: Arc<dyn DocumentStore>,
    disabled: DisabledModels,
    clock: SharedClock,
    state: Arc<Mutex<DirectoryState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl SessionDirectory {
    pub fn new(store: Arc<dyn DocumentStore>, disabled: DisabledModels, clock: SharedClock) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            store,
            disabled,
            clock,
            state: Arc::new(Mutex::new(DirectoryState::default())),
            revision: Arc::new(revision),
        }
    }

    /// Follows `uid`, tearing down the previous user's subscriptions first.
    pub fn watch(&self, uid: UserId) -> ChatResult<()> {
        let generation = {
            let mut state = self.lock();
            state.stop_pumps();
            state.generation = state.generation.wrapping_add(1);
            state.uid = Some(uid.clone());
            state.sessions.clear();
            state.folders.clear();
            state.generation
        };

        let chats = self
            .store
            .subscribe(&paths::chats(&uid))
            .context(StorageSnafu {
                stage: "directory-subscribe-chats",
            })?;
        let folders = self
            .store
            .subscribe(&paths::folders(&uid))
            .context(StorageSnafu {
                stage: "directory-subscribe-folders",
            })?;

        {
            let mut state = self.lock();
            if state.generation != generation {
                return Ok(());
            }
            let chats = self.spawn_pump(generation, chats, Feed::Sessions, &mut state);
            let folders = self.spawn_pump(generation, folders, Feed::Folders, &mut state);
            state.pumps.extend([chats, folders]);
        }
        self.bump();
        tracing::info!(%uid, generation, "session directory following user");
        Ok(())
    }

    /// Drops the current user's subscriptions and cached rows.
    pub fn stop(&self) {
        {
            let mut state = self.lock();
            state.stop_pumps();
            state.generation = state.generation.wrapping_add(1);
            state.uid = None;
            state.sessions.clear();
            state.folders.clear();
        }
        self.bump();
    }

    fn spawn_pump(
        &self,
        generation: u64,
        mut subscription: Subscription,
        feed: Feed,
        state: &mut DirectoryState,
    ) -> JoinHandle<()> {
        if let Some(snapshot) = subscription.try_recv() {
            apply_snapshot(state, feed, &snapshot);
        }

        let weak_state: Weak<Mutex<DirectoryState>> = Arc::downgrade(&self.state);
        let revision = self.revision.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                let Some(state) = weak_state.upgrade() else {
                    break;
                };
                {
                    let mut state = lock_state(&state);
                    if state.generation != generation {
                        tracing::debug!(generation, "dropping stale directory snapshot");
                        break;
                    }
                    apply_snapshot(&mut state, feed, &snapshot);
                }
                revision.send_modify(|value| *value = value.wrapping_add(1));
            }
        })
    }

    pub fn uid(&self) -> Option<UserId> {
        self.lock().uid.clone()
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.lock().sessions.clone()
    }

    pub fn folders(&self) -> Vec<FolderRecord> {
        self.lock().folders.clone()
    }

    pub fn session(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.lock()
            .sessions
            .iter()
            .find(|session| &session.id == session_id)
            .cloned()
    }

    pub fn view(&self) -> DirectoryView {
        let state = self.lock();
        build_view(&state.sessions, &state.folders, &state.options)
    }

    pub fn options(&self) -> ViewOptions {
        self.lock().options.clone()
    }

    pub fn set_sort(&self, sort: SortMode) {
        self.lock().options.sort = sort;
        self.bump();
    }

    pub fn set_query(&self, query: impl Into<String>) {
        self.lock().options.query = query.into();
        self.bump();
    }

    pub fn set_locale(&self, locale: Locale) {
        self.lock().options.locale = locale;
        self.bump();
    }

    /// Increments whenever the cached rows or the view options change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn is_model_disabled(&self, model_id: &str) -> bool {
        self.disabled.is_disabled(model_id)
    }

    pub async fn create_session(&self, title: Option<&str>, model: &str) -> ChatResult<SessionId> {
        ensure!(
            !self.disabled.is_disabled(model),
            ModelDisabledSnafu {
                stage: "create-session",
                model_id: model,
            }
        );
        let uid = self.require_uid("create-session")?;
        let now = self.clock.now_ms();
        let title = title
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(DEFAULT_SESSION_TITLE);

        let record = SessionRecord {
            id: SessionId::default(),
            title: title.to_string(),
            model: model.to_string(),
            created_at: now,
            last_message: now,
            message_count: 0,
            folder_id: None,
        };
        let key = append(self.store.as_ref(), &paths::chats(&uid), &record)
            .await
            .context(StorageSnafu {
                stage: "create-session",
            })?;
        let session_id = SessionId::new(key);
        tracing::info!(%uid, %session_id, model, "session created");
        Ok(session_id)
    }

    pub async fn rename_session(&self, session_id: &SessionId, title: &str) -> ChatResult<()> {
        let title = title.trim();
        ensure!(
            !title.is_empty(),
            EmptyNameSnafu {
                stage: "rename-session",
            }
        );
        self.patch_session(
            "rename-session",
            session_id,
            SessionPatch {
                title: Some(title.to_string()),
                ..SessionPatch::default()
            },
        )
        .await
    }

    pub async fn change_session_model(&self, session_id: &SessionId, model: &str) -> ChatResult<()> {
        ensure!(
            !self.disabled.is_disabled(model),
            ModelDisabledSnafu {
                stage: "change-session-model",
                model_id: model,
            }
        );
        self.patch_session(
            "change-session-model",
            session_id,
            SessionPatch {
                model: Some(model.to_string()),
                ..SessionPatch::default()
            },
        )
        .await
    }

    /// Removes messages, the override record and finally the metadata, stopping at the
    /// first failed write so a half-deleted session stays visible.
    pub async fn delete_session(&self, session_id: &SessionId) -> ChatResult<()> {
        let uid = self.require_uid("delete-session")?;
        delete_session_documents(self.store.as_ref(), &uid, session_id).await
    }

    pub async fn create_folder(&self, name: Option<&str>) -> ChatResult<FolderId> {
        let uid = self.require_uid("create-folder")?;
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FOLDER_NAME);
        self.push_folder(&uid, name).await
    }

    pub async fn rename_folder(&self, folder_id: &FolderId, name: &str) -> ChatResult<()> {
        let name = name.trim();
        ensure!(
            !name.is_empty(),
            EmptyNameSnafu {
                stage: "rename-folder",
            }
        );
        let uid = self.require_uid("rename-folder")?;
        let mut fields = Map::new();
        fields.insert("name".into(), Value::String(name.to_string()));
        self.store
            .update(&paths::folder(&uid, folder_id), fields)
            .await
            .context(StorageSnafu {
                stage: "rename-folder",
            })
    }

    /// Flips the collapsed flag and returns the new value.
    pub async fn toggle_folder(&self, folder_id: &FolderId) -> ChatResult<bool> {
        let uid = self.require_uid("toggle-folder")?;
        let collapsed = self
            .lock()
            .folders
            .iter()
            .find(|folder| &folder.id == folder_id)
            .map(|folder| !folder.collapsed)
            .context(FolderNotFoundSnafu {
                stage: "toggle-folder",
                folder_id: folder_id.as_str(),
            })?;

        let mut fields = Map::new();
        fields.insert("collapsed".into(), Value::Bool(collapsed));
        self.store
            .update(&paths::folder(&uid, folder_id), fields)
            .await
            .context(StorageSnafu {
                stage: "toggle-folder",
            })?;
        Ok(collapsed)
    }

    pub async fn delete_folder(&self, folder_id: &FolderId, mode: FolderDeleteMode) -> ChatResult<()> {
        let uid = self.require_uid("delete-folder")?;
        let members = self
            .lock()
            .sessions
            .iter()
            .filter(|session| session.folder_id.as_ref() == Some(folder_id))
            .map(|session| session.id.clone())
            .collect::<Vec<_>>();

        for session_id in &members {
            match mode {
                FolderDeleteMode::Scatter => {
                    self.patch_session(
                        "delete-folder-scatter",
                        session_id,
                        SessionPatch {
                            folder: Some(None),
                            ..SessionPatch::default()
                        },
                    )
                    .await?
                }
                FolderDeleteMode::Cascade => {
                    delete_session_documents(self.store.as_ref(), &uid, session_id).await?
                }
            }
        }

        self.store
            .remove(&paths::folder(&uid, folder_id))
            .await
            .context(StorageSnafu {
                stage: "delete-folder",
            })?;
        tracing::info!(%uid, %folder_id, ?mode, sessions = members.len(), "folder deleted");
        Ok(())
    }

    /// Plans a drag against the cached rows, then writes it.
    pub async fn drop_session(&self, dragged: &SessionId, target: &DropTarget) -> ChatResult<DropPlan> {
        let plan = {
            let state = self.lock();
            plan_drop(&state.sessions, &state.folders, dragged, target)
        };

        match &plan {
            DropPlan::NoOp => {}
            DropPlan::CreateFolder { dragged, target } => {
                let uid = self.require_uid("drop-create-folder")?;
                let folder_id = self.push_folder(&uid, DEFAULT_FOLDER_NAME).await?;
                for session_id in [dragged, target] {
                    self.assign_folder(session_id, Some(folder_id.clone())).await?;
                }
            }
            DropPlan::MoveToFolder { session, folder } => {
                self.assign_folder(session, Some(folder.clone())).await?;
            }
            DropPlan::ClearFolder { session } => {
                self.assign_folder(session, None).await?;
            }
        }
        tracing::debug!(%dragged, ?target, ?plan, "session dropped");
        Ok(plan)
    }

    pub async fn assign_folder(&self, session_id: &SessionId, folder: Option<FolderId>) -> ChatResult<()> {
        self.patch_session(
            "assign-folder",
            session_id,
            SessionPatch {
                folder: Some(folder),
                ..SessionPatch::default()
            },
        )
        .await
    }

    async fn push_folder(&self, uid: &UserId, name: &str) -> ChatResult<FolderId> {
        let record = FolderRecord {
            id: FolderId::default(),
            name: name.to_string(),
            collapsed: false,
            created_at: self.clock.now_ms(),
        };
        let key = append(self.store.as_ref(), &paths::folders(uid), &record)
            .await
            .context(StorageSnafu {
                stage: "create-folder",
            })?;
        let folder_id = FolderId::new(key);
        tracing::info!(%uid, %folder_id, name, "folder created");
        Ok(folder_id)
    }

    async fn patch_session(
        &self,
        stage: &'static str,
        session_id: &SessionId,
        patch: SessionPatch,
    ) -> ChatResult<()> {
        let uid = self.require_uid(stage)?;
        ensure!(
            self.session(session_id).is_some(),
            SessionNotFoundSnafu {
                stage,
                session_id: session_id.as_str(),
            }
        );
        self.store
            .update(&paths::chat(&uid, session_id), patch.into_fields())
            .await
            .context(StorageSnafu { stage })
    }

    fn require_uid(&self, stage: &'static str) -> ChatResult<UserId> {
        self.uid().context(NotSignedInSnafu { stage })
    }

    fn bump(&self) {
        self.revision
            .send_modify(|value| *value = value.wrapping_add(1));
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        lock_state(&self.state)
    }
}

async fn delete_session_documents(
    store: &dyn DocumentStore,
    uid: &UserId,
    session_id: &SessionId,
) -> ChatResult<()> {
    store
        .remove(&paths::messages(uid, session_id))
        .await
        .context(StorageSnafu {
            stage: "delete-session-messages",
        })?;
    store
        .remove(&paths::godmode(uid, session_id))
        .await
        .context(StorageSnafu {
            stage: "delete-session-override",
        })?;
    store
        .remove(&paths::chat(uid, session_id))
        .await
        .context(StorageSnafu {
            stage: "delete-session-metadata",
        })?;
    tracing::info!(%uid, %session_id, "session deleted");
    Ok(())
}

fn apply_snapshot(state: &mut DirectoryState, feed: Feed, snapshot: &relay_storage::Snapshot) {
    match feed {
        Feed::Sessions => state.sessions = snapshot.records(),
        Feed::Folders => state.folders = snapshot.records(),
    }
}

fn lock_state(state: &Mutex<DirectoryState>) -> MutexGuard<'_, DirectoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
