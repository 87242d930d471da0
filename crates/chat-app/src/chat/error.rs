use relay_llm::ResponderError;
use relay_storage::StorageError;
use snafu::Snafu;

use super::typing::TypingRejection;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("store call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("responder failed on `{stage}`: {source}"))]
    Responder {
        stage: &'static str,
        source: ResponderError,
    },
    #[snafu(display("no signed-in user on `{stage}`"))]
    NotSignedIn { stage: &'static str },
    #[snafu(display("message is empty on `{stage}`"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("nothing left to send after the image upload failed on `{stage}`"))]
    NothingToSend { stage: &'static str },
    #[snafu(display("model '{model_id}' is disabled on `{stage}`"))]
    ModelDisabled {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("free plan limit of {limit} requests reached on `{stage}`"))]
    QuotaExceeded { stage: &'static str, limit: u64 },
    #[snafu(display("session '{session_id}' not found on `{stage}`"))]
    SessionNotFound {
        stage: &'static str,
        session_id: String,
    },
    #[snafu(display("folder '{folder_id}' not found on `{stage}`"))]
    FolderNotFound {
        stage: &'static str,
        folder_id: String,
    },
    #[snafu(display("name must not be empty on `{stage}`"))]
    EmptyName { stage: &'static str },
    #[snafu(display("typing transition rejected on `{stage}`: {rejection:?}"))]
    TypingRejected {
        stage: &'static str,
        rejection: TypingRejection,
    },
}
