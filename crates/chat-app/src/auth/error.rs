use std::path::PathBuf;

use relay_storage::{IdentityError, StorageError};
use snafu::Snafu;

use super::onboarding::{WizardIssue, WizardStep};

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuthError {
    #[snafu(display("identity provider failed on `{stage}`: {source}"))]
    Identity {
        stage: &'static str,
        source: IdentityError,
    },
    #[snafu(display("store call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("registration is closed on `{stage}`"))]
    RegistrationClosed { stage: &'static str },
    #[snafu(display("signup form is invalid on `{stage}`: {issue:?}"))]
    InvalidForm {
        stage: &'static str,
        issue: WizardIssue,
    },
    #[snafu(display("signup wizard is at {step:?}, not complete, on `{stage}`"))]
    WizardIncomplete {
        stage: &'static str,
        step: WizardStep,
    },
    #[snafu(display("failed to create directory {} on `{stage}`: {source}", path.display()))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read {} on `{stage}`: {source}", path.display()))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write {} on `{stage}`: {source}", path.display()))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace {} on `{stage}`: {source}", path.display()))]
    RenameFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("key-value file {} is malformed on `{stage}`: {source}", path.display()))]
    DecodeFile {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("failed to encode key-value file on `{stage}`: {source}"))]
    EncodeFile {
        stage: &'static str,
        source: serde_json::Error,
    },
}

impl AuthError {
    /// Provider error code, when the failure came from the identity provider.
    pub fn auth_code(&self) -> Option<&relay_storage::AuthErrorCode> {
        match self {
            Self::Identity { source, .. } => source.code(),
            _ => None,
        }
    }
}
