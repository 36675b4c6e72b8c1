//! Input rules for registration and password changes.

use super::errors::AuthError;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const PASSWORD_MIN: usize = 6;
const PASSWORD_MAX: usize = 100;
const EMAIL_MAX: usize = 100;
const PASSWORD_SYMBOLS: &str = "@$!%*?&";

pub fn validate_username(username: &str) -> Result<(), AuthError> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(AuthError::validation(format!(
            "Username must be between {} and {} characters",
            USERNAME_MIN, USERNAME_MAX
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(AuthError::validation(
            "Username may only contain letters, digits and underscores",
        ));
    }
    Ok(())
}

/// A password needs a lowercase letter, an uppercase letter and a digit, and
/// may otherwise only use ASCII letters, digits and `@$!%*?&`.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    let len = password.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(AuthError::validation(format!(
            "Password must be between {} and {} characters",
            PASSWORD_MIN, PASSWORD_MAX
        )));
    }
    if !password
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SYMBOLS.contains(c))
    {
        return Err(AuthError::validation(format!(
            "Password may only contain letters, digits and {}",
            PASSWORD_SYMBOLS
        )));
    }
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(AuthError::validation(
            "Password must contain a lowercase letter, an uppercase letter and a digit",
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let invalid = || AuthError::validation("Invalid email address");

    if email.len() > EMAIL_MAX || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let (host, tld) = domain.rsplit_once('.').ok_or_else(invalid)?;
    if host.is_empty() || tld.is_empty() || host.starts_with('.') {
        return Err(invalid());
    }
    Ok(())
}

pub fn validate_confirmation(password: &str, confirmation: &str) -> Result<(), AuthError> {
    if password != confirmation {
        return Err(AuthError::validation("Passwords do not match"));
    }
    Ok(())
}
