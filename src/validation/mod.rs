/// Request validation
///
/// Rules are plain values; each field's rule list comes from a small function
/// and a [`Validator`] collects every failure before reporting them together.
use crate::error::{FieldError, IdentityError, IdentityResult};
use validator::ValidateEmail;

pub const USERNAME_MIN_LENGTH: usize = 3;
pub const USERNAME_MAX_LENGTH: usize = 32;
pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const PASSWORD_MAX_LENGTH: usize = 128;
pub const NAME_MAX_LENGTH: usize = 100;
pub const EMAIL_MAX_LENGTH: usize = 255;

/// A single check applied to a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Email,
    /// ASCII letters, digits, `_`, `-` and `.`
    UsernameChars,
}

impl Rule {
    /// Message for a failing value, `None` when the value passes
    ///
    /// Rules other than `Required` pass on an absent or empty value.
    pub fn check(&self, value: Option<&str>) -> Option<String> {
        let value = value.map(str::trim).unwrap_or("");

        match self {
            Rule::Required if value.is_empty() => Some("This field is required".to_string()),
            Rule::Required => None,
            _ if value.is_empty() => None,
            Rule::MinLength(min) if value.chars().count() < *min => {
                Some(format!("Must be at least {} characters", min))
            }
            Rule::MaxLength(max) if value.chars().count() > *max => {
                Some(format!("Must be at most {} characters", max))
            }
            Rule::Email if !value.validate_email() => {
                Some("Must be a valid email address".to_string())
            }
            Rule::UsernameChars
                if !value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) =>
            {
                Some("May only contain letters, numbers, '_', '-' and '.'".to_string())
            }
            _ => None,
        }
    }
}

pub fn username_rules() -> Vec<Rule> {
    vec![
        Rule::Required,
        Rule::MinLength(USERNAME_MIN_LENGTH),
        Rule::MaxLength(USERNAME_MAX_LENGTH),
        Rule::UsernameChars,
    ]
}

pub fn password_rules() -> Vec<Rule> {
    vec![
        Rule::Required,
        Rule::MinLength(PASSWORD_MIN_LENGTH),
        Rule::MaxLength(PASSWORD_MAX_LENGTH),
    ]
}

pub fn email_rules() -> Vec<Rule> {
    vec![Rule::Required, Rule::MaxLength(EMAIL_MAX_LENGTH), Rule::Email]
}

pub fn name_rules() -> Vec<Rule> {
    vec![Rule::Required, Rule::MaxLength(NAME_MAX_LENGTH)]
}

/// Rules for a field that may be left out, checked only when present
pub fn optional(rules: Vec<Rule>) -> Vec<Rule> {
    rules.into_iter().filter(|r| *r != Rule::Required).collect()
}

/// Canonical form for stored and compared emails
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accumulates field errors across a request
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply rules to a field; only the first failing rule is reported
    pub fn field(&mut self, name: &str, value: Option<&str>, rules: &[Rule]) -> &mut Self {
        if let Some(message) = rules.iter().find_map(|rule| rule.check(value)) {
            self.errors.push(FieldError::new(name, message));
        }
        self
    }

    /// Require `confirmation` to equal `value`
    pub fn confirmed(&mut self, name: &str, value: &str, confirmation: Option<&str>) -> &mut Self {
        if let Some(confirmation) = confirmation {
            if confirmation != value {
                self.errors
                    .push(FieldError::new(name, "Confirmation does not match"));
            }
        }
        self
    }

    /// Record an arbitrary failure
    pub fn error(&mut self, name: &str, message: impl Into<String>) -> &mut Self {
        self.errors.push(FieldError::new(name, message));
        self
    }

    pub fn finish(&mut self) -> IdentityResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(IdentityError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}
