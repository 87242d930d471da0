use relay_storage::StorageError;
use snafu::Snafu;

use crate::chat::ChatError;
use crate::moderation::ModerationError;
use crate::status::StatusError;

pub type AdminResult<T> = Result<T, AdminError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AdminError {
    #[snafu(display("operator access required on `{stage}`"))]
    NotAuthorized { stage: &'static str },
    #[snafu(display("store call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("image upload failed on `{stage}`: {source}"))]
    Upload {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("session is in automatic mode, injection refused on `{stage}`"))]
    AutomaticMode { stage: &'static str },
    #[snafu(display("message has neither text nor image on `{stage}`"))]
    EmptyInjection { stage: &'static str },
    #[snafu(display("session '{session_id}' not found on `{stage}`"))]
    SessionMissing {
        stage: &'static str,
        session_id: String,
    },
    #[snafu(display("observation failed on `{stage}`: {source}"))]
    Observe {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("moderation call failed on `{stage}`: {source}"))]
    Moderation {
        stage: &'static str,
        source: ModerationError,
    },
    #[snafu(display("uptime update failed on `{stage}`: {source}"))]
    Uptime {
        stage: &'static str,
        source: StatusError,
    },
}
