use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("path segment '{segment}' is invalid: {details}"))]
    InvalidPath {
        stage: &'static str,
        segment: String,
        details: &'static str,
    },
    #[snafu(display("storage entity at '{path}' was not found"))]
    NotFound { stage: &'static str, path: String },
    #[snafu(display("remote store is unavailable on `{stage}`"))]
    Unavailable { stage: &'static str },
    #[snafu(display("remote store rejected write to '{path}' on `{stage}`"))]
    WriteRejected { stage: &'static str, path: String },
    #[snafu(display("failed to encode value for '{path}' on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        path: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to decode value at '{path}' on `{stage}`: {source}"))]
    Decode {
        stage: &'static str,
        path: String,
        source: serde_json::Error,
    },
    #[snafu(display("blob path '{path}' is invalid: {details}"))]
    InvalidBlobPath {
        stage: &'static str,
        path: String,
        details: &'static str,
    },
    #[snafu(display("storage invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
