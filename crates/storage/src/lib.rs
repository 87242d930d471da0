//! Boundary to the managed backend: realtime documents, blobs and identity.
//!
//! The client never owns authoritative state. Everything here is either a trait the hosted
//! service satisfies or an in-memory stand-in with the same observable behavior.

pub mod blob;
pub mod document;
pub mod error;
pub mod identity;
pub mod ids;
pub mod memory;
pub mod path;
pub mod types;

pub use blob::{BlobStore, MemoryBlobStore, StoredBlob};
pub use document::{
    BoxFuture, DocumentStore, Snapshot, Subscription, append, decode_records, decode_value,
    encode_value, fetch, fetch_records, put,
};
pub use error::{StorageError, StorageResult};
pub use identity::{
    AuthErrorCode, AuthUser, GoogleProfile, IdentityError, IdentityProvider, IdentityResult,
    MIN_PASSWORD_LENGTH, MemoryIdentityProvider, SignInMethod, is_plausible_email,
};
pub use ids::{FolderId, MessageId, SessionId, TicketId, UserId};
pub use memory::MemoryStore;
pub use path::{DocPath, paths, sanitize_key};
pub use types::{
    BanRecord, DEFAULT_FOLDER_NAME, DEFAULT_SESSION_TITLE, FolderRecord, GodModeRecord,
    KeyedRecord, MessageRecord, MessageRole, NewMessage, NewSession, OverrideMode,
    PERMANENT_BAN_MINUTES, PaymentMode, PaymentRecord, Plan, SessionPatch, SessionRecord,
    SystemSettings, TicketMessageRecord, TicketRecord, TicketRole, TicketStatus, UptimeStatus,
    UserProfile, UserRole,
};
