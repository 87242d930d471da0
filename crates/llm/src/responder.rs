use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;

/// What the responder knows about the turn it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRequest {
    pub model_id: String,
    pub prompt: Option<String>,
    pub has_image: bool,
}

impl ResponseRequest {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: None,
            has_image: false,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_image(mut self, has_image: bool) -> Self {
        self.has_image = has_image;
        self
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ResponderResult<T> = Result<T, ResponderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ResponderError {
    #[snafu(display("responder '{responder_id}' has an empty response pool"))]
    EmptyPool {
        stage: &'static str,
        responder_id: String,
    },
    #[snafu(display("responder kind '{kind}' is not supported"))]
    UnsupportedResponder { stage: &'static str, kind: String },
}

/// Produces the text of an assistant turn.
///
/// The chat layer only depends on this seam, so a real inference backend can replace the
/// canned implementation without touching the message stream.
pub trait Responder: Send + Sync {
    fn id(&self) -> &str;
    fn compose<'a>(&'a self, request: &'a ResponseRequest) -> BoxFuture<'a, ResponderResult<String>>;
}
