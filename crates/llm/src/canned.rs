use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use snafu::ensure;

use super::responder::{
    BoxFuture, EmptyPoolSnafu, Responder, ResponderResult, ResponseRequest,
};

pub const CANNED_RESPONDER_ID: &str = "canned";

pub fn default_response_pool() -> Vec<String> {
    [
        "That's a great question! Let me think about it for a moment. The short answer is that it depends on the context, but here's how I'd approach it step by step.",
        "I can help with that. Start by breaking the problem into smaller parts, then tackle the one with the most unknowns first.",
        "Interesting! Here is a quick overview: the key ideas are simplicity, consistency and clear feedback. Want me to go deeper on any of them?",
        "Sure. Here's a concise summary of what you asked, followed by a few suggestions you can try right away.",
        "Good point. There are a few trade-offs to consider here, mostly around speed versus accuracy.",
        "Let me rephrase to make sure I understood: you want a practical solution you can apply today. Here's one that usually works well.",
        "Thanks for the details! Based on what you described, I'd recommend starting small and iterating.",
        "Here's an idea: write down the expected result first, then work backwards to the inputs you need.",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn default_suggestion_pool() -> Vec<String> {
    [
        "Explain quantum computing in simple terms",
        "Write a short poem about autumn",
        "Plan a three-day trip to Istanbul",
        "Help me debug a Rust borrow checker error",
        "Summarize the main ideas of stoicism",
        "Suggest a healthy dinner recipe",
        "Draft a polite follow-up email",
        "Compare SQL and NoSQL databases",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Picks replies uniformly at random from a fixed pool.
pub struct CannedResponder {
    pool: Vec<String>,
    suggestions: Vec<String>,
    rng: Mutex<StdRng>,
}

impl CannedResponder {
    pub fn new(pool: Vec<String>) -> ResponderResult<Self> {
        Self::with_rng(pool, StdRng::from_entropy())
    }

    /// Deterministic picks for tests and reproducible demos.
    pub fn with_seed(pool: Vec<String>, seed: u64) -> ResponderResult<Self> {
        Self::with_rng(pool, StdRng::seed_from_u64(seed))
    }

    fn with_rng(pool: Vec<String>, rng: StdRng) -> ResponderResult<Self> {
        let pool = pool
            .into_iter()
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect::<Vec<_>>();
        ensure!(
            !pool.is_empty(),
            EmptyPoolSnafu {
                stage: "canned-responder-new",
                responder_id: CANNED_RESPONDER_ID.to_string(),
            }
        );

        Ok(Self {
            pool,
            suggestions: default_suggestion_pool(),
            rng: Mutex::new(rng),
        })
    }

    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    pub fn pick(&self) -> String {
        let mut rng = self.rng();
        let index = rng.gen_range(0..self.pool.len());
        self.pool[index].clone()
    }

    /// Up to `count` distinct prompt suggestions for an empty conversation.
    pub fn suggestions(&self, count: usize) -> Vec<String> {
        let mut rng = self.rng();
        self.suggestions
            .choose_multiple(&mut *rng, count)
            .cloned()
            .collect()
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Responder for CannedResponder {
    fn id(&self) -> &str {
        CANNED_RESPONDER_ID
    }

    fn compose<'a>(&'a self, request: &'a ResponseRequest) -> BoxFuture<'a, ResponderResult<String>> {
        Box::pin(async move {
            let reply = self.pick();
            tracing::debug!(
                model_id = %request.model_id,
                has_image = request.has_image,
                reply_chars = reply.chars().count(),
                "canned reply selected"
            );
            Ok(reply)
        })
    }
}
