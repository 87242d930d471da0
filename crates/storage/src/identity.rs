use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use snafu::Snafu;
use tokio::sync::watch;

use super::document::BoxFuture;
use super::ids::UserId;

pub const MIN_PASSWORD_LENGTH: usize = 6;
const MAX_FAILED_SIGN_INS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignInMethod {
    Password,
    Google,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub method: SignInMethod,
}

/// Provider error codes the client knows how to explain to the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    WrongPassword,
    UserNotFound,
    EmailAlreadyInUse,
    WeakPassword,
    InvalidEmail,
    TooManyRequests,
    PopupClosed,
    Other(String),
}

impl AuthErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "auth/wrong-password" | "auth/invalid-credential" => Self::WrongPassword,
            "auth/user-not-found" => Self::UserNotFound,
            "auth/email-already-in-use" => Self::EmailAlreadyInUse,
            "auth/weak-password" => Self::WeakPassword,
            "auth/invalid-email" => Self::InvalidEmail,
            "auth/too-many-requests" => Self::TooManyRequests,
            "auth/popup-closed-by-user" => Self::PopupClosed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_code(&self) -> &str {
        match self {
            Self::WrongPassword => "auth/wrong-password",
            Self::UserNotFound => "auth/user-not-found",
            Self::EmailAlreadyInUse => "auth/email-already-in-use",
            Self::WeakPassword => "auth/weak-password",
            Self::InvalidEmail => "auth/invalid-email",
            Self::TooManyRequests => "auth/too-many-requests",
            Self::PopupClosed => "auth/popup-closed-by-user",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_code())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IdentityError {
    #[snafu(display("identity provider rejected `{stage}` with {code}"))]
    Rejected {
        stage: &'static str,
        code: AuthErrorCode,
    },
    #[snafu(display("no user is signed in on `{stage}`"))]
    NotSignedIn { stage: &'static str },
}

impl IdentityError {
    pub fn code(&self) -> Option<&AuthErrorCode> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            Self::NotSignedIn { .. } => None,
        }
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

pub trait IdentityProvider: Send + Sync {
    fn sign_up_with_email<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, IdentityResult<AuthUser>>;
    fn sign_in_with_email<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, IdentityResult<AuthUser>>;
    fn sign_in_with_google(&self) -> BoxFuture<'_, IdentityResult<AuthUser>>;
    fn update_display_name<'a>(
        &'a self,
        display_name: &'a str,
    ) -> BoxFuture<'a, IdentityResult<AuthUser>>;
    fn sign_out(&self) -> BoxFuture<'_, IdentityResult<()>>;
    fn current_user(&self) -> Option<AuthUser>;
    /// Emits the signed-in user (or `None`) on every change.
    fn observe(&self) -> watch::Receiver<Option<AuthUser>>;
}

#[derive(Debug, Clone)]
struct Account {
    uid: UserId,
    email: String,
    password: Option<String>,
    display_name: Option<String>,
    failed_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleProfile {
    pub email: String,
    pub display_name: String,
}

#[derive(Default)]
struct IdentityState {
    accounts: HashMap<String, Account>,
    google_profile: Option<GoogleProfile>,
}

/// Account registry kept in process; mirrors the provider's validation and error codes.
pub struct MemoryIdentityProvider {
    state: Mutex<IdentityState>,
    current: watch::Sender<Option<AuthUser>>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            state: Mutex::new(IdentityState::default()),
            current,
        }
    }
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account the next Google popup resolves to; without one the popup counts as closed.
    pub fn with_google_profile(
        self,
        email: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        self.lock().google_profile = Some(GoogleProfile {
            email: email.into(),
            display_name: display_name.into(),
        });
        self
    }

    fn lock(&self) -> MutexGuard<'_, IdentityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, user: Option<AuthUser>) {
        self.current.send_replace(user);
    }

    fn sign_up(&self, email: &str, password: &str) -> IdentityResult<AuthUser> {
        let email = normalize_email(email);
        if !is_plausible_email(&email) {
            return RejectedSnafu {
                stage: "sign-up-validate-email",
                code: AuthErrorCode::InvalidEmail,
            }
            .fail();
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return RejectedSnafu {
                stage: "sign-up-validate-password",
                code: AuthErrorCode::WeakPassword,
            }
            .fail();
        }

        let account = {
            let mut state = self.lock();
            if state.accounts.contains_key(&email) {
                return RejectedSnafu {
                    stage: "sign-up-unique-email",
                    code: AuthErrorCode::EmailAlreadyInUse,
                }
                .fail();
            }
            let account = Account {
                uid: UserId::new_v7(),
                email: email.clone(),
                password: Some(password.to_string()),
                display_name: None,
                failed_attempts: 0,
            };
            state.accounts.insert(email, account.clone());
            account
        };

        let user = to_auth_user(&account, SignInMethod::Password);
        tracing::info!(uid = %user.uid, "account created");
        self.publish(Some(user.clone()));
        Ok(user)
    }

    fn sign_in(&self, email: &str, password: &str) -> IdentityResult<AuthUser> {
        let email = normalize_email(email);
        if !is_plausible_email(&email) {
            return RejectedSnafu {
                stage: "sign-in-validate-email",
                code: AuthErrorCode::InvalidEmail,
            }
            .fail();
        }

        let account = {
            let mut state = self.lock();
            let Some(account) = state.accounts.get_mut(&email) else {
                return RejectedSnafu {
                    stage: "sign-in-lookup",
                    code: AuthErrorCode::UserNotFound,
                }
                .fail();
            };

            if account.failed_attempts >= MAX_FAILED_SIGN_INS {
                return RejectedSnafu {
                    stage: "sign-in-throttle",
                    code: AuthErrorCode::TooManyRequests,
                }
                .fail();
            }

            if account.password.as_deref() != Some(password) {
                account.failed_attempts += 1;
                return RejectedSnafu {
                    stage: "sign-in-password",
                    code: AuthErrorCode::WrongPassword,
                }
                .fail();
            }

            account.failed_attempts = 0;
            account.clone()
        };

        let user = to_auth_user(&account, SignInMethod::Password);
        self.publish(Some(user.clone()));
        Ok(user)
    }

    fn sign_in_google(&self) -> IdentityResult<AuthUser> {
        let account = {
            let mut state = self.lock();
            let Some(profile) = state.google_profile.clone() else {
                return RejectedSnafu {
                    stage: "google-popup",
                    code: AuthErrorCode::PopupClosed,
                }
                .fail();
            };

            let email = normalize_email(&profile.email);
            state
                .accounts
                .entry(email.clone())
                .or_insert_with(|| Account {
                    uid: UserId::new_v7(),
                    email,
                    password: None,
                    display_name: Some(profile.display_name.clone()),
                    failed_attempts: 0,
                })
                .clone()
        };

        let user = to_auth_user(&account, SignInMethod::Google);
        self.publish(Some(user.clone()));
        Ok(user)
    }

    fn rename(&self, display_name: &str) -> IdentityResult<AuthUser> {
        let Some(current) = self.current.borrow().clone() else {
            return NotSignedInSnafu {
                stage: "update-display-name",
            }
            .fail();
        };

        {
            let mut state = self.lock();
            if let Some(account) = state.accounts.get_mut(&current.email) {
                account.display_name = Some(display_name.to_string());
            }
        }

        let user = AuthUser {
            display_name: Some(display_name.to_string()),
            ..current
        };
        self.publish(Some(user.clone()));
        Ok(user)
    }
}

impl IdentityProvider for MemoryIdentityProvider {
    fn sign_up_with_email<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, IdentityResult<AuthUser>> {
        Box::pin(async move { self.sign_up(email, password) })
    }

    fn sign_in_with_email<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, IdentityResult<AuthUser>> {
        Box::pin(async move { self.sign_in(email, password) })
    }

    fn sign_in_with_google(&self) -> BoxFuture<'_, IdentityResult<AuthUser>> {
        Box::pin(async move { self.sign_in_google() })
    }

    fn update_display_name<'a>(
        &'a self,
        display_name: &'a str,
    ) -> BoxFuture<'a, IdentityResult<AuthUser>> {
        Box::pin(async move { self.rename(display_name) })
    }

    fn sign_out(&self) -> BoxFuture<'_, IdentityResult<()>> {
        Box::pin(async move {
            self.publish(None);
            Ok(())
        })
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.current.borrow().clone()
    }

    fn observe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.current.subscribe()
    }
}

fn to_auth_user(account: &Account, method: SignInMethod) -> AuthUser {
    AuthUser {
        uid: account.uid.clone(),
        email: account.email.clone(),
        display_name: account.display_name.clone(),
        method,
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Same shape check the provider applies before contacting its backend.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(name, tld)| !name.is_empty() && !tld.is_empty())
        && !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_validates_and_rejects_duplicates() {
        let identity = MemoryIdentityProvider::new();

        let weak = identity.sign_up_with_email("a@b.io", "123").await.unwrap_err();
        assert_eq!(weak.code(), Some(&AuthErrorCode::WeakPassword));

        let invalid = identity.sign_up_with_email("nope", "secret1").await.unwrap_err();
        assert_eq!(invalid.code(), Some(&AuthErrorCode::InvalidEmail));

        let user = identity.sign_up_with_email("A@B.io", "secret1").await.unwrap();
        assert_eq!(user.email, "a@b.io");
        assert_eq!(identity.current_user(), Some(user));

        let duplicate = identity.sign_up_with_email("a@b.io", "secret2").await.unwrap_err();
        assert_eq!(duplicate.code(), Some(&AuthErrorCode::EmailAlreadyInUse));
    }

    #[tokio::test]
    async fn repeated_wrong_passwords_throttle_the_account() {
        let identity = MemoryIdentityProvider::new();
        identity.sign_up_with_email("a@b.io", "secret1").await.unwrap();
        identity.sign_out().await.unwrap();

        for _ in 0..MAX_FAILED_SIGN_INS {
            let error = identity.sign_in_with_email("a@b.io", "bad").await.unwrap_err();
            assert_eq!(error.code(), Some(&AuthErrorCode::WrongPassword));
        }
        let throttled = identity.sign_in_with_email("a@b.io", "secret1").await.unwrap_err();
        assert_eq!(throttled.code(), Some(&AuthErrorCode::TooManyRequests));
    }

    #[tokio::test]
    async fn observers_see_sign_in_rename_and_sign_out() {
        let identity = MemoryIdentityProvider::new().with_google_profile("g@mail.com", "Gee");
        let mut observer = identity.observe();

        let user = identity.sign_in_with_google().await.unwrap();
        observer.changed().await.unwrap();
        assert_eq!(observer.borrow().as_ref().map(|u| u.uid.clone()), Some(user.uid.clone()));
        assert_eq!(user.display_name.as_deref(), Some("Gee"));

        let renamed = identity.update_display_name("G").await.unwrap();
        assert_eq!(renamed.display_name.as_deref(), Some("G"));

        identity.sign_out().await.unwrap();
        observer.changed().await.unwrap();
        assert!(observer.borrow().is_none());
    }

    #[tokio::test]
    async fn google_without_profile_reports_closed_popup() {
        let identity = MemoryIdentityProvider::new();
        let error = identity.sign_in_with_google().await.unwrap_err();
        assert_eq!(error.code(), Some(&AuthErrorCode::PopupClosed));
    }

    #[test]
    fn error_codes_roundtrip_through_strings() {
        for code in ["auth/wrong-password", "auth/weak-password", "auth/custom"] {
            assert_eq!(AuthErrorCode::from_code(code).as_code(), code);
        }
    }
}
