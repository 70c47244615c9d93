//! Alert recipient settings.

use thiserror::Error;

/// Most alert recipients a deployment may configure.
pub const MAX_ALERT_EMAILS: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Maximum {MAX_ALERT_EMAILS} emails allowed")]
    TooManyEmails,
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),
}

/// Trim, lowercase and de-duplicate recipient addresses, then validate them.
///
/// Order of first appearance is preserved.
pub fn normalize_alert_emails(emails: &[String]) -> Result<Vec<String>, SettingsError> {
    let mut normalized: Vec<String> = Vec::with_capacity(emails.len());
    for email in emails {
        let email = email.trim().to_lowercase();
        if !normalized.contains(&email) {
            normalized.push(email);
        }
    }

    if normalized.len() > MAX_ALERT_EMAILS {
        return Err(SettingsError::TooManyEmails);
    }

    if let Some(bad) = normalized.iter().find(|e| !is_plausible_email(e)) {
        return Err(SettingsError::InvalidEmail(bad.clone()));
    }

    Ok(normalized)
}

/// `local@domain.tld` with no whitespace and exactly one `@`.
fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((name, tld)) => !name.is_empty() && !tld.is_empty(),
        None => false,
    }
}
