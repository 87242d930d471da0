use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use relay_storage::{
    DocumentStore, MessageId, MessageRecord, MessageRole, SessionId, Snapshot, UserId, paths,
};
use snafu::ResultExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::error::{ChatError, ChatResult, StorageSnafu};
use super::typing::{TypingState, TypingTransition};

/// The (user, session) pair a stream is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub uid: UserId,
    pub session_id: SessionId,
}

impl StreamTarget {
    pub fn new(uid: UserId, session_id: SessionId) -> Self {
        Self { uid, session_id }
    }
}

/// One message as it should be displayed right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub model: String,
    pub timestamp: u64,
    pub image_url: Option<String>,
    pub typing: bool,
}

/// Display order: timestamp ascending, ties keep their incoming order.
pub fn order_messages(mut messages: Vec<MessageRecord>) -> Vec<MessageRecord> {
    messages.sort_by_key(|message| message.timestamp);
    messages
}

#[derive(Default)]
struct StreamState {
    target: Option<StreamTarget>,
    generation: u64,
    messages: Vec<MessageRecord>,
    typing: TypingState,
    pump: Option<JoinHandle<()>>,
    animator: Option<CancellationToken>,
}

impl StreamState {
    fn halt(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.stop_animator();
    }

    fn stop_animator(&mut self) {
        if let Some(token) = self.animator.take() {
            token.cancel();
        }
        self.typing = TypingState::Idle;
    }
}

impl Drop for StreamState {
    fn drop(&mut self) {
        self.halt();
    }
}

enum TypingStep {
    Advanced,
    Waiting,
    Finished,
}

enum TypingPhase {
    Revealing,
    Complete,
    Replaced,
}

/// Live, ordered messages of the open session plus the typing animation.
#[derive(Clone)]
pub struct MessageStream {
    store: Arc<dyn DocumentStore>,
    tick: Duration,
    state: Arc<Mutex<StreamState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl MessageStream {
    pub fn new(store: Arc<dyn DocumentStore>, tick: Duration) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            store,
            tick,
            state: Arc::new(Mutex::new(StreamState::default())),
            revision: Arc::new(revision),
        }
    }

    /// Switches to `target`.
    ///
    /// Previous messages and any running animation are discarded before the new
    /// subscription exists, and snapshots still queued for the old path are ignored.
    pub fn open(&self, target: StreamTarget) -> ChatResult<()> {
        let generation = {
            let mut state = self.lock();
            state.halt();
            state.generation = state.generation.wrapping_add(1);
            state.messages.clear();
            state.target = Some(target.clone());
            state.generation
        };
        self.bump();

        let mut subscription = self
            .store
            .subscribe(&paths::messages(&target.uid, &target.session_id))
            .context(StorageSnafu {
                stage: "stream-subscribe-messages",
            })?;

        {
            let mut state = self.lock();
            if state.generation != generation {
                return Ok(());
            }
            if let Some(snapshot) = subscription.try_recv() {
                apply_snapshot(&mut state, &snapshot);
            }

            let weak_state = Arc::downgrade(&self.state);
            let revision = self.revision.clone();
            state.pump = Some(tokio::spawn(async move {
                while let Some(snapshot) = subscription.next().await {
                    let Some(state) = weak_state.upgrade() else {
                        break;
                    };
                    {
                        let mut state = lock_state(&state);
                        if state.generation != generation {
                            tracing::debug!(generation, "dropping stale message snapshot");
                            break;
                        }
                        apply_snapshot(&mut state, &snapshot);
                    }
                    revision.send_modify(|value| *value = value.wrapping_add(1));
                }
            }));
        }
        self.bump();
        tracing::info!(
            uid = %target.uid,
            session_id = %target.session_id,
            generation,
            "message stream opened"
        );
        Ok(())
    }

    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.halt();
            state.generation = state.generation.wrapping_add(1);
            state.messages.clear();
            state.target = None;
        }
        self.bump();
    }

    pub fn target(&self) -> Option<StreamTarget> {
        self.lock().target.clone()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.lock().messages.clone()
    }

    pub fn typing(&self) -> TypingState {
        self.lock().typing.clone()
    }

    pub fn view(&self) -> Vec<MessageView> {
        let state = self.lock();
        state
            .messages
            .iter()
            .map(|message| MessageView {
                id: message.id.clone(),
                role: message.role,
                content: state
                    .typing
                    .displayed(&message.id, message.content_str())
                    .to_string(),
                model: message.model.clone(),
                timestamp: message.timestamp,
                image_url: message.image_url.clone(),
                typing: state.typing.active_message() == Some(&message.id),
            })
            .collect()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Starts revealing `message_id` if `target` is still the open session.
    ///
    /// Returns `false` when the stream has moved on. Ticks that find the message absent
    /// wait for its snapshot instead of advancing.
    pub fn begin_typing(&self, target: &StreamTarget, message_id: MessageId) -> ChatResult<bool> {
        let (token, generation) = {
            let mut state = self.lock();
            if state.target.as_ref() != Some(target) {
                return Ok(false);
            }
            if state.typing.active_message() == Some(&message_id) {
                return Ok(true);
            }

            let next = state
                .typing
                .apply(TypingTransition::Start(message_id.clone()))
                .map_err(|rejection| ChatError::TypingRejected {
                    stage: "begin-typing",
                    rejection,
                })?;
            if let Some(previous) = state.animator.take() {
                previous.cancel();
            }
            state.typing = next;
            let token = CancellationToken::new();
            state.animator = Some(token.clone());
            (token, state.generation)
        };
        self.bump();
        tracing::debug!(%message_id, generation, "typing started");

        let weak_state = Arc::downgrade(&self.state);
        let revision = self.revision.clone();
        let tick = self.tick;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let step = advance_typing(&weak_state, generation, &message_id, &token);
                match step {
                    TypingStep::Advanced => {
                        revision.send_modify(|value| *value = value.wrapping_add(1));
                    }
                    TypingStep::Waiting => {}
                    TypingStep::Finished => {
                        revision.send_modify(|value| *value = value.wrapping_add(1));
                        break;
                    }
                }
            }
        });
        Ok(true)
    }

    /// Aborts the running animation; the full text is shown immediately.
    pub fn stop_typing(&self) {
        let was_typing = {
            let mut state = self.lock();
            let was_typing = !state.typing.is_idle();
            if let Some(token) = state.animator.take() {
                token.cancel();
            }
            state.typing = state
                .typing
                .apply(TypingTransition::Abort)
                .unwrap_or_default();
            was_typing
        };
        if was_typing {
            tracing::debug!("typing aborted");
            self.bump();
        }
    }

    fn bump(&self) {
        self.revision
            .send_modify(|value| *value = value.wrapping_add(1));
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        lock_state(&self.state)
    }
}

fn advance_typing(
    weak_state: &Weak<Mutex<StreamState>>,
    generation: u64,
    message_id: &MessageId,
    token: &CancellationToken,
) -> TypingStep {
    let Some(state) = weak_state.upgrade() else {
        return TypingStep::Finished;
    };
    let mut state = lock_state(&state);
    if state.generation != generation || token.is_cancelled() {
        return TypingStep::Finished;
    }

    let phase = match &state.typing {
        TypingState::Typing {
            message_id: active, ..
        } if active == message_id => TypingPhase::Revealing,
        TypingState::Done {
            message_id: active,
        } if active == message_id => TypingPhase::Complete,
        _ => TypingPhase::Replaced,
    };

    match phase {
        TypingPhase::Revealing => {
            let Some(total_chars) = state
                .messages
                .iter()
                .find(|message| &message.id == message_id)
                .map(|message| message.content_str().chars().count())
            else {
                return TypingStep::Waiting;
            };
            match state.typing.apply(TypingTransition::Tick {
                message_id: message_id.clone(),
                total_chars,
            }) {
                Ok(next) => {
                    state.typing = next;
                    TypingStep::Advanced
                }
                Err(rejection) => {
                    tracing::warn!(?rejection, "typing tick rejected");
                    state.typing = TypingState::Idle;
                    state.animator = None;
                    TypingStep::Finished
                }
            }
        }
        TypingPhase::Complete => {
            state.typing = state
                .typing
                .apply(TypingTransition::Settle)
                .unwrap_or_default();
            state.animator = None;
            tracing::debug!(%message_id, "typing finished");
            TypingStep::Finished
        }
        TypingPhase::Replaced => TypingStep::Finished,
    }
}

fn apply_snapshot(state: &mut StreamState, snapshot: &Snapshot) {
    state.messages = order_messages(snapshot.records());
}

fn lock_state(state: &Mutex<StreamState>) -> MutexGuard<'_, StreamState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
