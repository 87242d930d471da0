//! Operator console.
//!
//! Every call checks the local operator flag first. Writes mirror the client-side
//! orchestrations: a fixed order per operation and no retry when a later write fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use relay_storage::{
    BanRecord, BlobStore, DocumentStore, GodModeRecord, MessageId, NewMessage, OverrideMode,
    PaymentMode, PaymentRecord, SessionId, SessionPatch, SessionRecord, TicketId, TicketRecord,
    TicketStatus, UptimeStatus, UserId, UserProfile, append, encode_value, fetch, fetch_records,
    paths, put,
};
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, ensure};

use super::error::{
    AdminResult, AutomaticModeSnafu, EmptyInjectionSnafu, ModerationSnafu, NotAuthorizedSnafu,
    ObserveSnafu, SessionMissingSnafu, StorageSnafu, UploadSnafu, UptimeSnafu,
};
use crate::auth::AuthorizationContext;
use crate::chat::{ImageAttachment, MessageStream, SessionDirectory, StreamTarget};
use crate::clock::SharedClock;
use crate::moderation::{TicketDesk, lift_ban};
use crate::settings::DisabledModels;
use crate::status::StatusBoard;

const GOD_IMAGE_PREFIX: &str = "god-images";

#[derive(Clone)]
pub struct GodModeConsole {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    clock: SharedClock,
    authorization: AuthorizationContext,
    tickets: TicketDesk,
    status: StatusBoard,
    directory: SessionDirectory,
    stream: MessageStream,
}

impl GodModeConsole {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        clock: SharedClock,
        disabled: DisabledModels,
        authorization: AuthorizationContext,
        typing_tick: Duration,
    ) -> Self {
        Self {
            tickets: TicketDesk::new(store.clone(), clock.clone()),
            status: StatusBoard::new(store.clone(), clock.clone()),
            directory: SessionDirectory::new(store.clone(), disabled, clock.clone()),
            stream: MessageStream::new(store.clone(), typing_tick),
            store,
            blobs,
            clock,
            authorization,
        }
    }

    pub fn is_available(&self) -> bool {
        self.authorization.is_admin()
    }

    /// Directory of the user currently under observation.
    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    pub fn stream(&self) -> &MessageStream {
        &self.stream
    }

    pub fn observe_user(&self, uid: UserId) -> AdminResult<()> {
        self.require_admin("observe-user")?;
        self.stream.close();
        self.directory.watch(uid.clone()).context(ObserveSnafu {
            stage: "observe-user",
        })?;
        tracing::info!(%uid, "operator observing user");
        Ok(())
    }

    pub fn observe_session(&self, uid: UserId, session_id: SessionId) -> AdminResult<()> {
        self.require_admin("observe-session")?;
        self.stream
            .open(StreamTarget::new(uid, session_id))
            .context(ObserveSnafu {
                stage: "observe-session",
            })
    }

    pub fn stop_observing(&self) {
        self.stream.close();
        self.directory.stop();
    }

    pub async fn override_mode(&self, uid: &UserId, session_id: &SessionId) -> AdminResult<OverrideMode> {
        self.require_admin("read-override")?;
        self.read_override(uid, session_id).await
    }

    pub async fn set_override(
        &self,
        uid: &UserId,
        session_id: &SessionId,
        mode: OverrideMode,
    ) -> AdminResult<()> {
        self.require_admin("set-override")?;
        let record = GodModeRecord {
            mode,
            timestamp: self.clock.now_ms(),
        };
        put(self.store.as_ref(), &paths::godmode(uid, session_id), &record)
            .await
            .context(StorageSnafu {
                stage: "set-override",
            })?;
        tracing::info!(%uid, %session_id, ?mode, "override mode set");
        Ok(())
    }

    /// Posts a message in the user's session as assistant (manual) or admin (admin mode).
    pub async fn inject_message(
        &self,
        uid: &UserId,
        session_id: &SessionId,
        text: &str,
        image: Option<ImageAttachment>,
    ) -> AdminResult<MessageId> {
        self.require_admin("inject-message")?;
        let text = text.trim();
        ensure!(
            !text.is_empty() || image.is_some(),
            EmptyInjectionSnafu {
                stage: "inject-message",
            }
        );

        let mode = self.read_override(uid, session_id).await?;
        let role = mode.operator_role().context(AutomaticModeSnafu {
            stage: "inject-message",
        })?;
        let session = fetch::<SessionRecord>(self.store.as_ref(), &paths::chat(uid, session_id))
            .await
            .context(StorageSnafu {
                stage: "inject-read-session",
            })?
            .context(SessionMissingSnafu {
                stage: "inject-read-session",
                session_id: session_id.to_string(),
            })?;

        let image_url = match image {
            Some(image) => {
                let path = god_image_path(self.clock.now_ms(), &image.file_name);
                let url = self
                    .blobs
                    .upload(&path, image.bytes, &image.content_type)
                    .await
                    .context(UploadSnafu {
                        stage: "inject-upload-image",
                    })?;
                Some(url)
            }
            None => None,
        };

        let now = self.clock.now_ms();
        let message = NewMessage {
            role,
            content: (!text.is_empty()).then(|| text.to_string()),
            model: session.model.clone(),
            timestamp: now,
            image_url,
        }
        .into_record();
        let key = append(self.store.as_ref(), &paths::messages(uid, session_id), &message)
            .await
            .context(StorageSnafu {
                stage: "inject-append-message",
            })?;

        let patch = SessionPatch {
            last_message: Some(now),
            message_count: Some(session.message_count.saturating_add(1)),
            ..SessionPatch::default()
        };
        self.store
            .update(&paths::chat(uid, session_id), patch.into_fields())
            .await
            .context(StorageSnafu {
                stage: "inject-update-session",
            })?;

        let message_id = MessageId::new(key);
        tracing::info!(%uid, %session_id, %message_id, ?role, "operator message injected");
        Ok(message_id)
    }

    /// `minutes == 0` bans permanently.
    pub async fn ban_user(&self, uid: &UserId, reason: &str, minutes: u64) -> AdminResult<BanRecord> {
        self.require_admin("ban-user")?;
        let record = BanRecord {
            reason: reason.trim().to_string(),
            duration: minutes,
            banned_at: self.clock.now_ms(),
        };
        put(self.store.as_ref(), &paths::ban(uid), &record)
            .await
            .context(StorageSnafu { stage: "put-ban" })?;
        let mut fields = Map::new();
        fields.insert("banned".into(), Value::Bool(true));
        self.store
            .update(&paths::user(uid), fields)
            .await
            .context(StorageSnafu {
                stage: "set-banned-flag",
            })?;
        tracing::info!(%uid, minutes, "user banned");
        Ok(record)
    }

    pub async fn unban_user(&self, uid: &UserId) -> AdminResult<()> {
        self.require_admin("unban-user")?;
        lift_ban(self.store.as_ref(), uid)
            .await
            .context(ModerationSnafu {
                stage: "unban-user",
            })?;
        tracing::info!(%uid, "user unbanned");
        Ok(())
    }

    pub async fn set_maintenance(
        &self,
        enabled: bool,
        message: &str,
        estimate: Option<&str>,
    ) -> AdminResult<()> {
        let mut fields = Map::new();
        fields.insert("maintenance".into(), Value::Bool(enabled));
        fields.insert("maintenanceMessage".into(), Value::from(message.trim()));
        let estimate = estimate.map(str::trim).filter(|text| !text.is_empty());
        fields.insert(
            "maintenanceEstimate".into(),
            estimate.map_or(Value::Null, Value::from),
        );
        self.update_settings("set-maintenance", fields).await
    }

    pub async fn set_registration(&self, enabled: bool) -> AdminResult<()> {
        let mut fields = Map::new();
        fields.insert("registrationEnabled".into(), Value::Bool(enabled));
        self.update_settings("set-registration", fields).await
    }

    pub async fn set_free_limit(&self, limit: u64) -> AdminResult<()> {
        let mut fields = Map::new();
        fields.insert("freeRequestLimit".into(), Value::from(limit));
        self.update_settings("set-free-limit", fields).await
    }

    /// Blank text clears the banner.
    pub async fn set_announcement(&self, text: &str) -> AdminResult<()> {
        let text = text.trim();
        let mut fields = Map::new();
        fields.insert(
            "announcement".into(),
            if text.is_empty() {
                Value::Null
            } else {
                Value::from(text)
            },
        );
        self.update_settings("set-announcement", fields).await
    }

    pub async fn set_payment_mode(&self, mode: PaymentMode) -> AdminResult<()> {
        let value = encode_value(&paths::settings(), &mode).context(StorageSnafu {
            stage: "encode-payment-mode",
        })?;
        let mut fields = Map::new();
        fields.insert("paymentMode".into(), value);
        self.update_settings("set-payment-mode", fields).await
    }

    pub async fn disable_model(&self, model_id: &str) -> AdminResult<()> {
        self.require_admin("disable-model")?;
        let path = paths::disabled_model(model_id).context(StorageSnafu {
            stage: "disabled-model-path",
        })?;
        self.store
            .set(&path, Value::Bool(true))
            .await
            .context(StorageSnafu {
                stage: "disable-model",
            })?;
        tracing::info!(model_id, "model disabled");
        Ok(())
    }

    pub async fn enable_model(&self, model_id: &str) -> AdminResult<()> {
        self.require_admin("enable-model")?;
        let path = paths::disabled_model(model_id).context(StorageSnafu {
            stage: "disabled-model-path",
        })?;
        self.store.remove(&path).await.context(StorageSnafu {
            stage: "enable-model",
        })?;
        tracing::info!(model_id, "model enabled");
        Ok(())
    }

    /// Newest first.
    pub async fn list_tickets(&self) -> AdminResult<Vec<TicketRecord>> {
        self.require_admin("list-tickets")?;
        let mut tickets = self.tickets.all_tickets().await.context(ModerationSnafu {
            stage: "list-tickets",
        })?;
        tickets.sort_by(|a, b| b.serial_number.cmp(&a.serial_number));
        Ok(tickets)
    }

    pub async fn reply_ticket(&self, ticket_id: &TicketId, content: &str) -> AdminResult<()> {
        self.require_admin("reply-ticket")?;
        self.tickets
            .post_operator_reply(ticket_id, content)
            .await
            .context(ModerationSnafu {
                stage: "reply-ticket",
            })
    }

    pub async fn close_ticket(&self, ticket_id: &TicketId) -> AdminResult<()> {
        self.require_admin("close-ticket")?;
        self.tickets
            .set_status(ticket_id, TicketStatus::Closed)
            .await
            .context(ModerationSnafu {
                stage: "close-ticket",
            })
    }

    pub async fn reopen_ticket(&self, ticket_id: &TicketId) -> AdminResult<()> {
        self.require_admin("reopen-ticket")?;
        self.tickets
            .set_status(ticket_id, TicketStatus::Open)
            .await
            .context(ModerationSnafu {
                stage: "reopen-ticket",
            })
    }

    /// Most recently active first.
    pub async fn list_users(&self) -> AdminResult<Vec<UserProfile>> {
        self.require_admin("list-users")?;
        let mut users = fetch_records::<UserProfile>(self.store.as_ref(), &paths::users())
            .await
            .context(StorageSnafu {
                stage: "list-users",
            })?;
        users.sort_by(|a, b| b.last_login.cmp(&a.last_login));
        Ok(users)
    }

    /// Newest first.
    pub async fn list_payments(&self) -> AdminResult<Vec<PaymentRecord>> {
        self.require_admin("list-payments")?;
        let payments =
            fetch::<BTreeMap<String, PaymentRecord>>(self.store.as_ref(), &paths::payments())
                .await
                .context(StorageSnafu {
                    stage: "list-payments",
                })?
                .unwrap_or_default();
        let mut payments: Vec<PaymentRecord> = payments.into_values().collect();
        payments.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(payments)
    }

    pub async fn set_uptime_slot(
        &self,
        component: &str,
        index: usize,
        status: UptimeStatus,
    ) -> AdminResult<()> {
        self.require_admin("set-uptime-slot")?;
        self.status
            .set_slot(component, index, status)
            .await
            .context(UptimeSnafu {
                stage: "set-uptime-slot",
            })
    }

    async fn read_override(&self, uid: &UserId, session_id: &SessionId) -> AdminResult<OverrideMode> {
        let record = fetch::<GodModeRecord>(self.store.as_ref(), &paths::godmode(uid, session_id))
            .await
            .context(StorageSnafu {
                stage: "read-override",
            })?;
        Ok(record.map(|record| record.mode).unwrap_or_default())
    }

    async fn update_settings(&self, stage: &'static str, fields: Map<String, Value>) -> AdminResult<()> {
        self.require_admin(stage)?;
        let keys: Vec<String> = fields.keys().cloned().collect();
        self.store
            .update(&paths::settings(), fields)
            .await
            .context(StorageSnafu { stage })?;
        tracing::info!(?keys, stage, "system settings updated");
        Ok(())
    }

    fn require_admin(&self, stage: &'static str) -> AdminResult<()> {
        ensure!(self.authorization.is_admin(), NotAuthorizedSnafu { stage });
        Ok(())
    }
}

pub fn god_image_path(now_ms: u64, file_name: &str) -> String {
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
    format!("{GOD_IMAGE_PREFIX}/{now_ms}_{name}")
}
