//! Key-path addressing for the remote document store.
//!
//! Every location the client reads or writes is built through [`paths`], and every free-form
//! identifier that becomes a key goes through [`sanitize_key`] on both the read and the write
//! side. Call sites never format paths by hand.

use std::fmt;

use snafu::ensure;

use super::error::{InvalidPathSnafu, StorageResult};
use super::ids::{FolderId, MessageId, SessionId, TicketId, UserId};

/// Characters the store refuses inside a single key.
pub const FORBIDDEN_KEY_CHARACTERS: [char; 6] = ['.', '/', '#', '$', '[', ']'];

/// Replaces literal dots so a model id such as `gpt-4.1` can be used as a key.
pub fn sanitize_key(raw: &str) -> String {
    raw.replace('.', "_")
}

pub fn validate_segment(stage: &'static str, segment: &str) -> StorageResult<()> {
    ensure!(
        !segment.is_empty(),
        InvalidPathSnafu {
            stage,
            segment: segment.to_string(),
            details: "segment is empty",
        }
    );
    ensure!(
        !segment.contains(FORBIDDEN_KEY_CHARACTERS),
        InvalidPathSnafu {
            stage,
            segment: segment.to_string(),
            details: "segment contains a forbidden character",
        }
    );
    ensure!(
        !segment.chars().any(char::is_control),
        InvalidPathSnafu {
            stage,
            segment: segment.to_string(),
            details: "segment contains a control character",
        }
    );
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a `/`-separated path, ignoring leading and trailing separators.
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let mut path = Self::root();
        for segment in raw.split('/').filter(|segment| !segment.is_empty()) {
            path = path.child(segment)?;
        }
        Ok(path)
    }

    pub fn child(&self, segment: impl AsRef<str>) -> StorageResult<Self> {
        let segment = segment.as_ref();
        validate_segment("doc-path-child", segment)?;
        Ok(self.join_trusted(segment))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }

        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// True when `self` equals `other` or is one of its ancestors.
    pub fn contains(&self, other: &DocPath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// True when a write at one path can change the value observed at the other.
    pub fn overlaps(&self, other: &DocPath) -> bool {
        self.contains(other) || other.contains(self)
    }

    // Typed ids and generated keys are valid by construction.
    fn join_trusted(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    fn from_trusted<const N: usize>(segments: [&str; N]) -> Self {
        Self {
            segments: segments.iter().map(|segment| segment.to_string()).collect(),
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return formatter.write_str("/");
        }
        formatter.write_str(&self.segments.join("/"))
    }
}

pub mod paths {
    use super::*;

    pub const USERS: &str = "users";
    pub const CHATS: &str = "chats";
    pub const MESSAGES: &str = "messages";
    pub const FOLDERS: &str = "folders";
    pub const GODMODE: &str = "godmode";
    pub const BANS: &str = "bans";
    pub const TICKETS: &str = "tickets";
    pub const DISABLED_MODELS: &str = "disabledModels";
    pub const SETTINGS: &str = "settings";
    pub const UPTIME: &str = "uptime";
    pub const VISITS: &str = "visits";
    pub const PAYMENTS: &str = "payments";

    pub fn users() -> DocPath {
        DocPath::from_trusted([USERS])
    }

    pub fn user(uid: &UserId) -> DocPath {
        DocPath::from_trusted([USERS, uid.as_str()])
    }

    pub fn chats(uid: &UserId) -> DocPath {
        DocPath::from_trusted([CHATS, uid.as_str()])
    }

    pub fn chat(uid: &UserId, session_id: &SessionId) -> DocPath {
        DocPath::from_trusted([CHATS, uid.as_str(), session_id.as_str()])
    }

    pub fn messages(uid: &UserId, session_id: &SessionId) -> DocPath {
        DocPath::from_trusted([MESSAGES, uid.as_str(), session_id.as_str()])
    }

    pub fn message(uid: &UserId, session_id: &SessionId, message_id: &MessageId) -> DocPath {
        DocPath::from_trusted([
            MESSAGES,
            uid.as_str(),
            session_id.as_str(),
            message_id.as_str(),
        ])
    }

    pub fn folders(uid: &UserId) -> DocPath {
        DocPath::from_trusted([FOLDERS, uid.as_str()])
    }

    pub fn folder(uid: &UserId, folder_id: &FolderId) -> DocPath {
        DocPath::from_trusted([FOLDERS, uid.as_str(), folder_id.as_str()])
    }

    pub fn godmode(uid: &UserId, session_id: &SessionId) -> DocPath {
        DocPath::from_trusted([GODMODE, uid.as_str(), session_id.as_str()])
    }

    pub fn bans() -> DocPath {
        DocPath::from_trusted([BANS])
    }

    pub fn ban(uid: &UserId) -> DocPath {
        DocPath::from_trusted([BANS, uid.as_str()])
    }

    pub fn tickets() -> DocPath {
        DocPath::from_trusted([TICKETS])
    }

    pub fn ticket(ticket_id: &TicketId) -> DocPath {
        DocPath::from_trusted([TICKETS, ticket_id.as_str()])
    }

    pub fn ticket_messages(ticket_id: &TicketId) -> DocPath {
        DocPath::from_trusted([TICKETS, ticket_id.as_str(), MESSAGES])
    }

    pub fn disabled_models() -> DocPath {
        DocPath::from_trusted([DISABLED_MODELS])
    }

    pub fn disabled_model(model_id: &str) -> StorageResult<DocPath> {
        disabled_models().child(sanitize_key(model_id))
    }

    pub fn settings() -> DocPath {
        DocPath::from_trusted([SETTINGS])
    }

    pub fn uptime_root() -> DocPath {
        DocPath::from_trusted([UPTIME])
    }

    pub fn uptime(component: &str) -> StorageResult<DocPath> {
        uptime_root().child(sanitize_key(component))
    }

    pub fn visit(timestamp_ms: u64) -> DocPath {
        DocPath::from_trusted([VISITS]).join_trusted(&timestamp_ms.to_string())
    }

    pub fn payments() -> DocPath {
        DocPath::from_trusted([PAYMENTS])
    }
}
