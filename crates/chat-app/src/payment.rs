//! Simulated plan checkout.
//!
//! No card data leaves the client. The outcome of every attempt is decided by the global
//! `paymentMode` flag, so operators can demo each failure path on demand.

use std::sync::Arc;

use relay_storage::{
    DocumentStore, PaymentMode, PaymentRecord, Plan, StorageError, UserId, append, paths,
};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu, ensure};

use crate::clock::SharedClock;
use crate::settings::SystemSettingsWatch;

pub const CARD_METHOD: &str = "card";

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PaymentError {
    #[snafu(display("store call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("plan '{}' cannot be purchased on `{stage}`", plan.as_str()))]
    NotPurchasable { stage: &'static str, plan: Plan },
}

/// Monthly price in cents.
pub fn plan_price(plan: Plan) -> u64 {
    match plan {
        Plan::Free => 0,
        Plan::Pro => 999,
        Plan::Ultra => 2_499,
    }
}

pub fn format_price(cents: u64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardDetails {
    pub number: String,
    /// `MM/YY`
    pub expiry: String,
    pub cvc: String,
    pub holder: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardIssue {
    Number,
    Expiry,
    Cvc,
    Holder,
}

/// Form-level checks shown next to the card fields.
pub fn validate_card(card: &CardDetails) -> Vec<CardIssue> {
    let mut issues = Vec::new();

    let digits: String = card.number.chars().filter(|ch| !ch.is_whitespace()).collect();
    if digits.len() != 16 || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        issues.push(CardIssue::Number);
    }
    if !valid_expiry(card.expiry.trim()) {
        issues.push(CardIssue::Expiry);
    }
    let cvc = card.cvc.trim();
    if cvc.len() != 3 || !cvc.chars().all(|ch| ch.is_ascii_digit()) {
        issues.push(CardIssue::Cvc);
    }
    if card.holder.trim().is_empty() {
        issues.push(CardIssue::Holder);
    }
    issues
}

fn valid_expiry(expiry: &str) -> bool {
    let Some((month, year)) = expiry.split_once('/') else {
        return false;
    };
    if month.len() != 2 || year.len() != 2 || !year.chars().all(|ch| ch.is_ascii_digit()) {
        return false;
    }
    matches!(month.parse::<u8>(), Ok(1..=12))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded(PaymentRecord),
    InsufficientFunds,
    InvalidCard,
}

#[derive(Clone)]
pub struct Checkout {
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    system: SystemSettingsWatch,
}

impl Checkout {
    pub fn new(store: Arc<dyn DocumentStore>, clock: SharedClock, system: SystemSettingsWatch) -> Self {
        Self {
            store,
            clock,
            system,
        }
    }

    /// Runs one payment attempt; on success the record is appended before the plan changes.
    pub async fn purchase(
        &self,
        uid: &UserId,
        email: &str,
        plan: Plan,
        card: &CardDetails,
    ) -> PaymentResult<PaymentOutcome> {
        ensure!(
            plan != Plan::Free,
            NotPurchasableSnafu {
                stage: "purchase-plan",
                plan,
            }
        );
        let issues = validate_card(card);
        if !issues.is_empty() {
            tracing::debug!(%uid, ?issues, "card details look invalid, continuing");
        }

        let mode = self.system.current().payment_mode;
        match mode {
            PaymentMode::InsufficientFunds => {
                tracing::info!(%uid, plan = plan.as_str(), "payment declined: insufficient funds");
                return Ok(PaymentOutcome::InsufficientFunds);
            }
            PaymentMode::InvalidCard => {
                tracing::info!(%uid, plan = plan.as_str(), "payment declined: invalid card");
                return Ok(PaymentOutcome::InvalidCard);
            }
            PaymentMode::Success => {}
        }

        let record = PaymentRecord {
            email: email.trim().to_string(),
            uid: uid.clone(),
            plan,
            method: CARD_METHOD.to_string(),
            amount: plan_price(plan),
            timestamp: self.clock.now_ms(),
        };
        append(self.store.as_ref(), &paths::payments(), &record)
            .await
            .context(StorageSnafu {
                stage: "append-payment",
            })?;

        let mut fields = Map::new();
        fields.insert("plan".into(), Value::from(plan.as_str()));
        self.store
            .update(&paths::user(uid), fields)
            .await
            .context(StorageSnafu {
                stage: "update-plan",
            })?;
        tracing::info!(%uid, plan = plan.as_str(), amount = record.amount, "payment succeeded");
        Ok(PaymentOutcome::Succeeded(record))
    }
}
