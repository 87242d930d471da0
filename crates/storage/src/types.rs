use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::{FolderId, MessageId, SessionId, TicketId, UserId};

/// Title given to sessions created before the first message names them.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";
/// Name given to folders created by dropping one session onto another.
pub const DEFAULT_FOLDER_NAME: &str = "New Folder";
/// Ban duration that never expires on its own.
pub const PERMANENT_BAN_MINUTES: u64 = 0;

/// Records stored under a generated key carry that key as their id.
pub trait KeyedRecord {
    fn assign_key(&mut self, key: &str);
}

macro_rules! keyed_record {
    ($record:ty, $field:ident, $id:ty) => {
        impl KeyedRecord for $record {
            fn assign_key(&mut self, key: &str) {
                self.$field = <$id>::new(key);
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Admin,
}

/// Operator override for who answers inside one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideMode {
    #[default]
    Auto,
    Manual,
    Admin,
}

impl OverrideMode {
    pub fn is_automatic(self) -> bool {
        matches!(self, Self::Auto)
    }

    /// Role carried by messages an operator injects under this mode.
    pub fn operator_role(self) -> Option<MessageRole> {
        match self {
            Self::Auto => None,
            Self::Manual => Some(MessageRole::Assistant),
            Self::Admin => Some(MessageRole::Admin),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default, skip_serializing)]
    pub id: SessionId,
    pub title: String,
    pub model: String,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub last_message: u64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
}

keyed_record!(SessionRecord, id, SessionId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub title: String,
    pub model: String,
}

/// Field-level session update; `folder: Some(None)` clears the assignment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub model: Option<String>,
    pub folder: Option<Option<FolderId>>,
    pub last_message: Option<u64>,
    pub message_count: Option<u64>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn into_fields(self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(title) = self.title {
            fields.insert("title".into(), Value::String(title));
        }
        if let Some(model) = self.model {
            fields.insert("model".into(), Value::String(model));
        }
        if let Some(folder) = self.folder {
            let value = folder.map_or(Value::Null, |id| Value::String(id.into()));
            fields.insert("folderId".into(), value);
        }
        if let Some(last_message) = self.last_message {
            fields.insert("lastMessage".into(), Value::from(last_message));
        }
        if let Some(message_count) = self.message_count {
            fields.insert("messageCount".into(), Value::from(message_count));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    #[serde(default, skip_serializing)]
    pub id: FolderId,
    pub name: String,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub created_at: u64,
}

keyed_record!(FolderRecord, id, FolderId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(default, skip_serializing)]
    pub id: MessageId,
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub model: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

keyed_record!(MessageRecord, id, MessageId);

impl MessageRecord {
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Message payload before the store assigns it a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: Option<String>,
    pub model: String,
    pub timestamp: u64,
    pub image_url: Option<String>,
}

impl NewMessage {
    pub fn into_record(self) -> MessageRecord {
        MessageRecord {
            id: MessageId::default(),
            role: self.role,
            content: self.content,
            model: self.model,
            timestamp: self.timestamp,
            image_url: self.image_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GodModeRecord {
    pub mode: OverrideMode,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanRecord {
    #[serde(default)]
    pub reason: String,
    /// Minutes; zero means permanent.
    #[serde(default)]
    pub duration: u64,
    pub banned_at: u64,
}

impl BanRecord {
    pub fn is_permanent(&self) -> bool {
        self.duration == PERMANENT_BAN_MINUTES
    }

    pub fn expires_at_ms(&self) -> Option<u64> {
        if self.is_permanent() {
            return None;
        }
        Some(
            self.banned_at
                .saturating_add(self.duration.saturating_mul(60_000)),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketRole {
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    #[serde(default, skip_serializing)]
    pub id: TicketId,
    pub serial_number: u64,
    pub uid: UserId,
    #[serde(default)]
    pub email: String,
    pub subject: String,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(default)]
    pub created_at: u64,
}

keyed_record!(TicketRecord, id, TicketId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMessageRecord {
    #[serde(default, skip_serializing)]
    pub id: MessageId,
    pub role: TicketRole,
    pub content: String,
    pub timestamp: u64,
}

keyed_record!(TicketMessageRecord, id, MessageId);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    #[default]
    Success,
    InsufficientFunds,
    InvalidCard,
}

/// Global singleton read by every client and written only by the admin console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemSettings {
    pub maintenance: bool,
    pub maintenance_message: String,
    pub maintenance_estimate: Option<String>,
    pub registration_enabled: bool,
    pub free_request_limit: u64,
    pub announcement: Option<String>,
    pub payment_mode: PaymentMode,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            maintenance: false,
            maintenance_message: String::new(),
            maintenance_estimate: None,
            registration_enabled: true,
            free_request_limit: 20,
            announcement: None,
            payment_mode: PaymentMode::Success,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Ultra,
}

impl Plan {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Ultra => "ultra",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing)]
    pub uid: UserId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub visible_nick: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub banned: bool,
    #[serde(default)]
    pub unique_id: String,
    #[serde(default)]
    pub last_login: u64,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

keyed_record!(UserProfile, uid, UserId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub email: String,
    pub uid: UserId,
    pub plan: Plan,
    pub method: String,
    pub amount: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UptimeStatus {
    #[default]
    Operational,
    Maintenance,
    Degraded,
    Down,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_patch_clears_folder_with_null() {
        let fields = SessionPatch {
            folder: Some(None),
            message_count: Some(3),
            ..SessionPatch::default()
        }
        .into_fields();

        assert_eq!(fields.get("folderId"), Some(&Value::Null));
        assert_eq!(fields.get("messageCount"), Some(&json!(3)));
        assert!(!fields.contains_key("title"));
    }

    #[test]
    fn records_use_camel_case_and_skip_ids() {
        let record = SessionRecord {
            id: SessionId::new("s1"),
            title: "Hi".into(),
            model: "gpt-4o".into(),
            created_at: 1,
            last_message: 2,
            message_count: 0,
            folder_id: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["lastMessage"], json!(2));
        assert!(value.get("id").is_none());
        assert!(value.get("folderId").is_none());
    }

    #[test]
    fn ban_expiry_is_minutes_after_ban() {
        let finite = BanRecord {
            reason: "spam".into(),
            duration: 5,
            banned_at: 1_000,
        };
        assert_eq!(finite.expires_at_ms(), Some(301_000));

        let permanent = BanRecord {
            duration: PERMANENT_BAN_MINUTES,
            ..finite
        };
        assert!(permanent.is_permanent());
        assert_eq!(permanent.expires_at_ms(), None);
    }

    #[test]
    fn system_settings_fill_missing_fields_with_defaults() {
        let settings: SystemSettings =
            serde_json::from_value(json!({ "maintenance": true, "paymentMode": "invalid_card" }))
                .unwrap();
        assert!(settings.maintenance);
        assert!(settings.registration_enabled);
        assert_eq!(settings.payment_mode, PaymentMode::InvalidCard);
        assert_eq!(settings.free_request_limit, 20);
    }

    #[test]
    fn override_mode_maps_to_operator_role() {
        assert_eq!(OverrideMode::Auto.operator_role(), None);
        assert_eq!(
            OverrideMode::Manual.operator_role(),
            Some(MessageRole::Assistant)
        );
        assert_eq!(OverrideMode::Admin.operator_role(), Some(MessageRole::Admin));
    }
}
