use std::sync::Arc;

mod canned;
mod model;
mod responder;

pub use canned::{
    CANNED_RESPONDER_ID, CannedResponder, default_response_pool, default_suggestion_pool,
};
pub use model::{DEFAULT_MODEL, Model, ModelCatalog, default_models};
pub use responder::{
    BoxFuture, Responder, ResponderError, ResponderResult, ResponseRequest,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponderConfig {
    pub kind: String,
    /// Replaces the built-in reply pool when non-empty.
    pub pool: Vec<String>,
    pub seed: Option<u64>,
}

pub fn create_responder(config: ResponderConfig) -> ResponderResult<Arc<dyn Responder>> {
    let kind = match config.kind.trim() {
        "" => CANNED_RESPONDER_ID,
        kind => kind,
    };

    match kind {
        CANNED_RESPONDER_ID => {
            let pool = if config.pool.is_empty() {
                default_response_pool()
            } else {
                config.pool
            };
            let responder = match config.seed {
                Some(seed) => CannedResponder::with_seed(pool, seed)?,
                None => CannedResponder::new(pool)?,
            };
            Ok(Arc::new(responder))
        }
        _ => Err(ResponderError::UnsupportedResponder {
            stage: "create-responder",
            kind: kind.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_kind_falls_back_to_canned() {
        let responder = create_responder(ResponderConfig::default()).unwrap();
        assert_eq!(responder.id(), CANNED_RESPONDER_ID);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let error = create_responder(ResponderConfig {
            kind: "openai".into(),
            ..ResponderConfig::default()
        })
        .err()
        .unwrap();
        assert!(matches!(error, ResponderError::UnsupportedResponder { .. }));
    }
}
