use std::sync::{Arc, Mutex, PoisonError};

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relay_llm::ModelCatalog;
use relay_storage::{
    AuthUser, DocumentStore, IdentityProvider, MIN_PASSWORD_LENGTH, Plan, UserId, UserProfile,
    UserRole, fetch, is_plausible_email, paths, put,
};
use serde_json::{Map, Value};
use snafu::{ResultExt, ensure};

use super::error::{
    AuthResult, IdentitySnafu, InvalidFormSnafu, RegistrationClosedSnafu, StorageSnafu,
    WizardIncompleteSnafu,
};
use crate::clock::SharedClock;
use crate::locale::Locale;
use crate::settings::SystemSettingsWatch;

const UNIQUE_ID_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WizardStep {
    #[default]
    Credentials,
    Profile,
    Preferences,
    Complete,
}

impl WizardStep {
    fn previous(self) -> Self {
        match self {
            Self::Credentials | Self::Profile => Self::Credentials,
            Self::Preferences => Self::Profile,
            Self::Complete => Self::Preferences,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WizardIssue {
    InvalidEmail,
    PasswordTooShort,
    PasswordMismatch,
    EmptyDisplayName,
    EmptyNick,
    UnknownModel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignupDraft {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub visible_nick: String,
    pub preferred_model: String,
    pub locale: Locale,
}

/// Multi-step signup form. Every step validates locally before the next one opens.
#[derive(Debug, Clone)]
pub struct SignupWizard {
    step: WizardStep,
    draft: SignupDraft,
    catalog: ModelCatalog,
}

impl SignupWizard {
    pub fn new(catalog: ModelCatalog) -> Self {
        let preferred_model = catalog
            .models
            .first()
            .map(|model| model.id.clone())
            .unwrap_or_else(|| relay_llm::DEFAULT_MODEL.to_string());
        Self {
            step: WizardStep::Credentials,
            draft: SignupDraft {
                preferred_model,
                ..SignupDraft::default()
            },
            catalog,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn draft(&self) -> &SignupDraft {
        &self.draft
    }

    pub fn submit_credentials(
        &mut self,
        email: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<WizardStep, WizardIssue> {
        let email = email.trim();
        if !is_plausible_email(email) {
            return Err(WizardIssue::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(WizardIssue::PasswordTooShort);
        }
        if password != confirmation {
            return Err(WizardIssue::PasswordMismatch);
        }
        self.draft.email = email.to_string();
        self.draft.password = password.to_string();
        self.step = WizardStep::Profile;
        Ok(self.step)
    }

    pub fn submit_profile(&mut self, display_name: &str, visible_nick: &str) -> Result<WizardStep, WizardIssue> {
        let display_name = display_name.trim();
        let visible_nick = visible_nick.trim();
        if display_name.is_empty() {
            return Err(WizardIssue::EmptyDisplayName);
        }
        if visible_nick.is_empty() {
            return Err(WizardIssue::EmptyNick);
        }
        self.draft.display_name = display_name.to_string();
        self.draft.visible_nick = visible_nick.to_string();
        self.step = WizardStep::Preferences;
        Ok(self.step)
    }

    pub fn submit_preferences(&mut self, model: &str, locale: Locale) -> Result<WizardStep, WizardIssue> {
        if !self.catalog.contains(model) {
            return Err(WizardIssue::UnknownModel);
        }
        self.draft.preferred_model = model.to_string();
        self.draft.locale = locale;
        self.step = WizardStep::Complete;
        Ok(self.step)
    }

    pub fn back(&mut self) -> WizardStep {
        self.step = self.step.previous();
        self.step
    }
}

/// Account creation and sign-in on top of the identity provider.
pub struct Onboarding {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    system: SystemSettingsWatch,
    rng: Mutex<StdRng>,
}

impl Onboarding {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
        system: SystemSettingsWatch,
    ) -> Self {
        Self {
            identity,
            store,
            clock,
            system,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Creates the account, its profile document and the provider display name.
    pub async fn complete_signup(&self, wizard: &SignupWizard) -> AuthResult<UserProfile> {
        ensure!(
            wizard.step() == WizardStep::Complete,
            WizardIncompleteSnafu {
                stage: "complete-signup",
                step: wizard.step(),
            }
        );
        ensure!(
            self.system.current().registration_enabled,
            RegistrationClosedSnafu {
                stage: "complete-signup",
            }
        );
        let draft = wizard.draft();
        ensure!(
            !draft.display_name.is_empty(),
            InvalidFormSnafu {
                stage: "complete-signup",
                issue: WizardIssue::EmptyDisplayName,
            }
        );

        let user = self
            .identity
            .sign_up_with_email(&draft.email, &draft.password)
            .await
            .context(IdentitySnafu {
                stage: "create-account",
            })?;

        let now = self.clock.now_ms();
        let profile = UserProfile {
            uid: user.uid.clone(),
            display_name: draft.display_name.clone(),
            visible_nick: draft.visible_nick.clone(),
            email: user.email.clone(),
            plan: Plan::Free,
            role: UserRole::User,
            banned: false,
            unique_id: self.unique_id(),
            last_login: now,
            created_at: now,
            request_count: 0,
            preferred_model: Some(draft.preferred_model.clone()),
            locale: Some(draft.locale.as_tag().to_string()),
        };
        self.write_profile(&profile, "write-profile").await?;

        self.identity
            .update_display_name(&draft.display_name)
            .await
            .context(IdentitySnafu {
                stage: "update-display-name",
            })?;
        tracing::info!(uid = %profile.uid, unique_id = profile.unique_id, "signup completed");
        Ok(profile)
    }

    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        let user = self
            .identity
            .sign_in_with_email(email, password)
            .await
            .context(IdentitySnafu {
                stage: "sign-in-email",
            })?;
        self.touch_last_login(&user.uid).await?;
        tracing::info!(uid = %user.uid, "signed in with email");
        Ok(user)
    }

    /// Signs in through Google; the first login creates the profile.
    pub async fn sign_in_with_google(&self) -> AuthResult<UserProfile> {
        let user = self
            .identity
            .sign_in_with_google()
            .await
            .context(IdentitySnafu {
                stage: "sign-in-google",
            })?;

        let existing = fetch::<UserProfile>(self.store.as_ref(), &paths::user(&user.uid))
            .await
            .context(StorageSnafu {
                stage: "read-profile",
            })?;
        if let Some(mut profile) = existing {
            self.touch_last_login(&user.uid).await?;
            profile.uid = user.uid.clone();
            profile.last_login = self.clock.now_ms();
            tracing::info!(uid = %user.uid, "signed in with google");
            return Ok(profile);
        }

        if !self.system.current().registration_enabled {
            if let Err(error) = self.identity.sign_out().await {
                tracing::warn!(%error, "sign-out after closed registration failed");
            }
            return RegistrationClosedSnafu {
                stage: "google-first-login",
            }
            .fail();
        }

        let now = self.clock.now_ms();
        let display_name = user
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| user.email.split('@').next().unwrap_or_default().to_string());
        let profile = UserProfile {
            uid: user.uid.clone(),
            visible_nick: display_name.clone(),
            display_name,
            email: user.email.clone(),
            plan: Plan::Free,
            role: UserRole::User,
            banned: false,
            unique_id: self.unique_id(),
            last_login: now,
            created_at: now,
            request_count: 0,
            preferred_model: None,
            locale: None,
        };
        self.write_profile(&profile, "write-google-profile").await?;
        tracing::info!(uid = %profile.uid, "profile created on first google login");
        Ok(profile)
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.identity.sign_out().await.context(IdentitySnafu {
            stage: "sign-out",
        })
    }

    async fn touch_last_login(&self, uid: &UserId) -> AuthResult<()> {
        let mut fields = Map::new();
        fields.insert("lastLogin".into(), Value::from(self.clock.now_ms()));
        self.store
            .update(&paths::user(uid), fields)
            .await
            .context(StorageSnafu {
                stage: "refresh-last-login",
            })
    }

    async fn write_profile(&self, profile: &UserProfile, stage: &'static str) -> AuthResult<()> {
        put(self.store.as_ref(), &paths::user(&profile.uid), profile)
            .await
            .context(StorageSnafu { stage })
    }

    fn unique_id(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        generate_unique_id(&mut *rng)
    }
}

pub fn generate_unique_id(rng: &mut impl Rng) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(UNIQUE_ID_LENGTH)
        .map(|byte| char::from(byte).to_ascii_uppercase())
        .collect()
}
