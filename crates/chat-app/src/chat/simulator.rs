use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relay_llm::{Responder, ResponseRequest};
use relay_storage::{
    DocumentStore, GodModeRecord, MessageId, MessageRole, NewMessage, OverrideMode, SessionId,
    SessionPatch, SessionRecord, UserId, append, fetch, paths,
};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use super::error::{ChatResult, ResponderSnafu, StorageSnafu};
use crate::clock::SharedClock;

/// Inclusive bounds of the pause before a simulated reply lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    min: Duration,
    max: Duration,
}

impl DelayWindow {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rng.gen_range(min..=max))
    }
}

/// Everything the simulator needs to answer one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTurn {
    pub uid: UserId,
    pub session_id: SessionId,
    pub model: String,
    pub prompt: Option<String>,
    pub has_image: bool,
    /// `messageCount` before the user message of this turn was written.
    pub baseline_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// An operator owns the session; nothing was written.
    Skipped(OverrideMode),
    Cancelled,
    /// The session was deleted while the reply was being prepared.
    SessionGone,
    Replied(MessageId),
}

/// Produces the automatic assistant turn, unless an operator has taken the session over.
pub struct ResponseSimulator {
    store: Arc<dyn DocumentStore>,
    responder: Arc<dyn Responder>,
    clock: SharedClock,
    delay: DelayWindow,
    rng: Mutex<StdRng>,
}

impl ResponseSimulator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        responder: Arc<dyn Responder>,
        clock: SharedClock,
        delay: DelayWindow,
    ) -> Self {
        Self {
            store,
            responder,
            clock,
            delay,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn delay_window(&self) -> DelayWindow {
        self.delay
    }

    /// Runs one reply cycle.
    ///
    /// The override mode is read before and again after the delay, and nothing is written
    /// once the session is gone. The assistant message is appended first and the session
    /// metadata (`messageCount = baseline + 2`) right after.
    pub async fn reply(&self, turn: ReplyTurn, token: CancellationToken) -> ChatResult<ReplyOutcome> {
        let mode = self.override_mode(&turn).await?;
        if !mode.is_automatic() {
            tracing::info!(uid = %turn.uid, session_id = %turn.session_id, ?mode, "operator owns session, reply skipped");
            return Ok(ReplyOutcome::Skipped(mode));
        }

        let delay = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.delay.sample(&mut *rng)
        };
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(session_id = %turn.session_id, "reply cancelled during delay");
                return Ok(ReplyOutcome::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let mode = self.override_mode(&turn).await?;
        if !mode.is_automatic() {
            tracing::info!(session_id = %turn.session_id, ?mode, "operator took over during delay");
            return Ok(ReplyOutcome::Skipped(mode));
        }

        let request = ResponseRequest::new(turn.model.clone()).with_image(turn.has_image);
        let request = match &turn.prompt {
            Some(prompt) => request.with_prompt(prompt.clone()),
            None => request,
        };
        let content = self
            .responder
            .compose(&request)
            .await
            .context(ResponderSnafu {
                stage: "compose-reply",
            })?;

        if token.is_cancelled() {
            return Ok(ReplyOutcome::Cancelled);
        }
        let session = fetch::<SessionRecord>(
            self.store.as_ref(),
            &paths::chat(&turn.uid, &turn.session_id),
        )
        .await
        .context(StorageSnafu {
            stage: "check-session-before-reply",
        })?;
        if session.is_none() {
            tracing::info!(uid = %turn.uid, session_id = %turn.session_id, "session deleted, reply dropped");
            return Ok(ReplyOutcome::SessionGone);
        }

        let now = self.clock.now_ms();
        let message = NewMessage {
            role: MessageRole::Assistant,
            content: Some(content),
            model: turn.model.clone(),
            timestamp: now,
            image_url: None,
        }
        .into_record();
        let key = append(
            self.store.as_ref(),
            &paths::messages(&turn.uid, &turn.session_id),
            &message,
        )
        .await
        .context(StorageSnafu {
            stage: "append-reply",
        })?;

        let patch = SessionPatch {
            last_message: Some(now),
            message_count: Some(turn.baseline_count.saturating_add(2)),
            ..SessionPatch::default()
        };
        self.store
            .update(&paths::chat(&turn.uid, &turn.session_id), patch.into_fields())
            .await
            .context(StorageSnafu {
                stage: "update-session-after-reply",
            })?;

        let message_id = MessageId::new(key);
        tracing::info!(
            uid = %turn.uid,
            session_id = %turn.session_id,
            %message_id,
            delay_ms = delay.as_millis() as u64,
            "simulated reply appended"
        );
        Ok(ReplyOutcome::Replied(message_id))
    }

    async fn override_mode(&self, turn: &ReplyTurn) -> ChatResult<OverrideMode> {
        let record = fetch::<GodModeRecord>(
            self.store.as_ref(),
            &paths::godmode(&turn.uid, &turn.session_id),
        )
        .await
        .context(StorageSnafu {
            stage: "read-override-mode",
        })?;
        Ok(record.map(|record| record.mode).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use relay_llm::CannedResponder;
    use relay_storage::{MessageRecord, fetch_records, put};

    use super::*;
    use crate::testing::{Backend, session};

    fn simulator(backend: &Backend) -> ResponseSimulator {
        let responder = CannedResponder::with_seed(vec!["canned".into()], 3).unwrap();
        ResponseSimulator::new(
            backend.shared_store(),
            Arc::new(responder),
            backend.clock.clone(),
            DelayWindow::new(Duration::from_millis(600), Duration::from_millis(1_400)),
        )
        .with_seed(9)
    }

    fn turn(uid: &UserId, session_id: &SessionId) -> ReplyTurn {
        ReplyTurn {
            uid: uid.clone(),
            session_id: session_id.clone(),
            model: "gpt-4o".into(),
            prompt: Some("Hello".into()),
            has_image: false,
            baseline_count: 0,
        }
    }

    async fn set_mode(backend: &Backend, uid: &UserId, session_id: &SessionId, mode: OverrideMode) {
        put(
            &backend.store,
            &paths::godmode(uid, session_id),
            &GodModeRecord { mode, timestamp: 1 },
        )
        .await
        .unwrap();
    }

    #[test]
    fn delay_window_samples_inside_bounds() {
        let window = DelayWindow::new(Duration::from_millis(1_400), Duration::from_millis(600));
        assert_eq!(window.min(), Duration::from_millis(600));
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let delay = window.sample(&mut rng);
            assert!(delay >= window.min() && delay <= window.max());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auto_mode_appends_exactly_one_reply_after_the_delay() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let sid = backend.seed_session(&uid, "s1", session("Hello", 1, 1)).await;
        let simulator = simulator(&backend);

        let started = tokio::time::Instant::now();
        let outcome = simulator
            .reply(turn(&uid, &sid), CancellationToken::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(600) && elapsed <= Duration::from_millis(1_400));

        let ReplyOutcome::Replied(message_id) = outcome else {
            panic!("expected a reply, got {outcome:?}");
        };
        let messages: Vec<MessageRecord> =
            fetch_records(&backend.store, &paths::messages(&uid, &sid)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, message_id);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(messages[0].content_str(), "canned");
        assert_eq!(messages[0].model, "gpt-4o");

        let chat: SessionRecord = fetch(&backend.store, &paths::chat(&uid, &sid))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chat.message_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_and_admin_modes_never_append() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        for (raw, mode) in [("s1", OverrideMode::Manual), ("s2", OverrideMode::Admin)] {
            let sid = backend.seed_session(&uid, raw, session("Hi", 1, 1)).await;
            set_mode(&backend, &uid, &sid, mode).await;
            let outcome = simulator(&backend)
                .reply(turn(&uid, &sid), CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome, ReplyOutcome::Skipped(mode));
            assert!(backend.store.value_at(&paths::messages(&uid, &sid)).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn takeover_during_the_delay_suppresses_the_reply() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let sid = backend.seed_session(&uid, "s1", session("Hi", 1, 1)).await;
        let simulator = Arc::new(simulator(&backend));

        let task = {
            let simulator = simulator.clone();
            let turn = turn(&uid, &sid);
            tokio::spawn(async move { simulator.reply(turn, CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        set_mode(&backend, &uid, &sid, OverrideMode::Manual).await;

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, ReplyOutcome::Skipped(OverrideMode::Manual));
        assert!(backend.store.value_at(&paths::messages(&uid, &sid)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_before_the_delay_elapses_prevents_the_append() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let sid = backend.seed_session(&uid, "s1", session("Hi", 1, 1)).await;
        let simulator = Arc::new(simulator(&backend));
        let token = CancellationToken::new();

        let task = {
            let simulator = simulator.clone();
            let turn = turn(&uid, &sid);
            let token = token.clone();
            tokio::spawn(async move { simulator.reply(turn, token).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();

        assert_eq!(task.await.unwrap().unwrap(), ReplyOutcome::Cancelled);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backend.store.value_at(&paths::messages(&uid, &sid)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_the_session_during_the_delay_drops_the_reply() {
        let backend = Backend::new();
        let uid = UserId::new("u1");
        let sid = backend.seed_session(&uid, "s1", session("Hi", 1, 1)).await;
        let simulator = Arc::new(simulator(&backend));

        let task = {
            let simulator = simulator.clone();
            let turn = turn(&uid, &sid);
            tokio::spawn(async move { simulator.reply(turn, CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        backend.store.remove(&paths::chat(&uid, &sid)).await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), ReplyOutcome::SessionGone);
        assert!(backend.store.value_at(&paths::messages(&uid, &sid)).is_none());
        assert!(backend.store.value_at(&paths::chat(&uid, &sid)).is_none());
    }
}
