//! Sign-up, sign-in and the local operator flag.

mod error;

pub mod authorization;
pub mod messages;
pub mod onboarding;

pub use authorization::{
    AuthorizationContext, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore,
};
pub use error::{AuthError, AuthResult};
pub use messages::{auth_error_message, describe_auth_error, wizard_issue_message};
pub use onboarding::{Onboarding, SignupDraft, SignupWizard, WizardIssue, WizardStep};
