use relay_storage::AuthErrorCode;

use super::error::AuthError;
use super::onboarding::WizardIssue;
use crate::locale::Locale;

pub fn auth_error_message(code: &AuthErrorCode, locale: Locale) -> &'static str {
    match (locale, code) {
        (Locale::En, AuthErrorCode::WrongPassword) => "Incorrect email or password.",
        (Locale::Ru, AuthErrorCode::WrongPassword) => "Неверный email или пароль.",
        (Locale::En, AuthErrorCode::UserNotFound) => "No account exists for this email.",
        (Locale::Ru, AuthErrorCode::UserNotFound) => "Аккаунт с таким email не найден.",
        (Locale::En, AuthErrorCode::EmailAlreadyInUse) => "This email is already registered.",
        (Locale::Ru, AuthErrorCode::EmailAlreadyInUse) => "Этот email уже зарегистрирован.",
        (Locale::En, AuthErrorCode::WeakPassword) => "Password must be at least 6 characters.",
        (Locale::Ru, AuthErrorCode::WeakPassword) => "Пароль должен содержать не менее 6 символов.",
        (Locale::En, AuthErrorCode::InvalidEmail) => "Enter a valid email address.",
        (Locale::Ru, AuthErrorCode::InvalidEmail) => "Введите корректный email.",
        (Locale::En, AuthErrorCode::TooManyRequests) => {
            "Too many attempts. Please try again later."
        }
        (Locale::Ru, AuthErrorCode::TooManyRequests) => {
            "Слишком много попыток. Попробуйте позже."
        }
        (Locale::En, AuthErrorCode::PopupClosed) => "The sign-in window was closed.",
        (Locale::Ru, AuthErrorCode::PopupClosed) => "Окно входа было закрыто.",
        (Locale::En, AuthErrorCode::Other(_)) => "Something went wrong. Please try again.",
        (Locale::Ru, AuthErrorCode::Other(_)) => "Что-то пошло не так. Попробуйте ещё раз.",
    }
}

pub fn wizard_issue_message(issue: WizardIssue, locale: Locale) -> &'static str {
    match (locale, issue) {
        (Locale::En, WizardIssue::InvalidEmail) => "Enter a valid email address.",
        (Locale::Ru, WizardIssue::InvalidEmail) => "Введите корректный email.",
        (Locale::En, WizardIssue::PasswordTooShort) => "Password must be at least 6 characters.",
        (Locale::Ru, WizardIssue::PasswordTooShort) => {
            "Пароль должен содержать не менее 6 символов."
        }
        (Locale::En, WizardIssue::PasswordMismatch) => "Passwords do not match.",
        (Locale::Ru, WizardIssue::PasswordMismatch) => "Пароли не совпадают.",
        (Locale::En, WizardIssue::EmptyDisplayName) => "Enter your name.",
        (Locale::Ru, WizardIssue::EmptyDisplayName) => "Введите имя.",
        (Locale::En, WizardIssue::EmptyNick) => "Choose a nickname.",
        (Locale::Ru, WizardIssue::EmptyNick) => "Придумайте никнейм.",
        (Locale::En, WizardIssue::UnknownModel) => "Pick one of the available models.",
        (Locale::Ru, WizardIssue::UnknownModel) => "Выберите одну из доступных моделей.",
    }
}

/// Text shown to the user for any onboarding failure.
pub fn describe_auth_error(error: &AuthError, locale: Locale) -> &'static str {
    match error {
        AuthError::Identity { source, .. } => match source.code() {
            Some(code) => auth_error_message(code, locale),
            None => auth_error_message(&AuthErrorCode::Other(String::new()), locale),
        },
        AuthError::InvalidForm { issue, .. } => wizard_issue_message(*issue, locale),
        AuthError::RegistrationClosed { .. } => match locale {
            Locale::En => "Registration is temporarily closed.",
            Locale::Ru => "Регистрация временно закрыта.",
        },
        _ => auth_error_message(&AuthErrorCode::Other(String::new()), locale),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_codes_map_to_both_locales() {
        let code = AuthErrorCode::from_code("auth/invalid-credential");
        assert_eq!(auth_error_message(&code, Locale::En), "Incorrect email or password.");
        assert_eq!(auth_error_message(&code, Locale::Ru), "Неверный email или пароль.");

        let unknown = AuthErrorCode::from_code("auth/network-request-failed");
        assert_eq!(
            auth_error_message(&unknown, Locale::En),
            "Something went wrong. Please try again."
        );
    }

    #[test]
    fn closed_registration_has_its_own_message() {
        let error = AuthError::RegistrationClosed { stage: "test" };
        assert_eq!(describe_auth_error(&error, Locale::Ru), "Регистрация временно закрыта.");
    }
}
