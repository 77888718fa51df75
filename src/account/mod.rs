/// Account management system
///
/// Handles account registration, authentication, bearer sessions, email
/// verification, password reset and the account lifecycle.

pub mod lifecycle;
mod manager;
pub mod password_reset;
pub mod signed_link;
pub mod store;
pub mod tokens;

pub use lifecycle::{is_authenticable, AccountLifecycleManager, AccountState};
pub use manager::{AccountManager, AuthenticatedSession, Registration, VerificationOutcome};
pub use password_reset::PasswordResetTokenStore;
pub use signed_link::{SignedLink, SignedLinkVerifier};
pub use store::AccountStore;
pub use tokens::{IssuedToken, TokenStore, ValidatedToken};

use crate::{
    admin::roles::{effective_permissions, Role},
    db::account::{AccessToken, Account},
    error::IdentityResult,
    validation::{
        email_rules, name_rules, normalize_email, optional, password_rules, username_rules, Rule,
        Validator,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

/// Validated registration
#[derive(Debug, Clone)]
pub struct RegisterCommand {
    pub username: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    /// Validate and resolve defaults; the display name falls back to the username
    pub fn into_command(self) -> IdentityResult<RegisterCommand> {
        let password = self.password.unwrap_or_default();

        Validator::new()
            .field("username", self.username.as_deref(), &username_rules())
            .field("name", self.name.as_deref(), &optional(name_rules()))
            .field("email", self.email.as_deref(), &email_rules())
            .field("password", Some(password.as_str()), &password_rules())
            .confirmed("password", &password, self.password_confirmation.as_deref())
            .finish()?;

        let username = self.username.unwrap_or_default().trim().to_string();
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| username.clone());

        Ok(RegisterCommand {
            username,
            name,
            email: normalize_email(&self.email.unwrap_or_default()),
            password,
        })
    }
}

/// Login request; `login` is a username or an email address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "username", alias = "email")]
    pub login: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginCommand {
    pub login: String,
    pub password: String,
}

impl LoginRequest {
    pub fn into_command(self) -> IdentityResult<LoginCommand> {
        Validator::new()
            .field("login", self.login.as_deref(), &[Rule::Required])
            .field("password", self.password.as_deref(), &[Rule::Required])
            .finish()?;

        Ok(LoginCommand {
            login: self.login.unwrap_or_default().trim().to_string(),
            password: self.password.unwrap_or_default(),
        })
    }
}

/// Change password request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
    pub new_password_confirmation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChangePasswordCommand {
    pub current_password: String,
    pub new_password: String,
}

impl ChangePasswordRequest {
    pub fn into_command(self) -> IdentityResult<ChangePasswordCommand> {
        let new_password = self.new_password.unwrap_or_default();

        Validator::new()
            .field(
                "current_password",
                self.current_password.as_deref(),
                &[Rule::Required],
            )
            .field("new_password", Some(new_password.as_str()), &password_rules())
            .confirmed(
                "new_password",
                &new_password,
                self.new_password_confirmation.as_deref(),
            )
            .finish()?;

        Ok(ChangePasswordCommand {
            current_password: self.current_password.unwrap_or_default(),
            new_password,
        })
    }
}

/// Request carrying only an email (forgot password, resend verification)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub email: Option<String>,
}

impl EmailRequest {
    /// Validated, normalized email
    pub fn into_email(self) -> IdentityResult<String> {
        Validator::new()
            .field("email", self.email.as_deref(), &email_rules())
            .finish()?;

        Ok(normalize_email(&self.email.unwrap_or_default()))
    }
}

/// Reset password request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: Option<String>,
    pub token: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResetPasswordCommand {
    pub email: String,
    pub token: String,
    pub password: String,
}

impl ResetPasswordRequest {
    pub fn into_command(self) -> IdentityResult<ResetPasswordCommand> {
        let password = self.password.unwrap_or_default();

        Validator::new()
            .field("email", self.email.as_deref(), &email_rules())
            .field("token", self.token.as_deref(), &[Rule::Required])
            .field("password", Some(password.as_str()), &password_rules())
            .confirmed("password", &password, self.password_confirmation.as_deref())
            .finish()?;

        Ok(ResetPasswordCommand {
            email: normalize_email(&self.email.unwrap_or_default()),
            token: self.token.unwrap_or_default().trim().to_string(),
            password,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Signed link query parameters as received
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyEmailQuery {
    pub id: Option<String>,
    pub hash: Option<String>,
    pub expires: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VerifyEmailCommand {
    pub id: i64,
    pub hash: String,
    pub expires: i64,
    pub signature: String,
}

impl VerifyEmailQuery {
    /// All four parameters are required; `id` and `expires` must be integers
    pub fn into_command(self) -> IdentityResult<VerifyEmailCommand> {
        let required = [Rule::Required];
        let mut validator = Validator::new();
        validator
            .field("id", self.id.as_deref(), &required)
            .field("hash", self.hash.as_deref(), &required)
            .field("expires", self.expires.as_deref(), &required)
            .field("signature", self.signature.as_deref(), &required);

        let id = non_empty(self.id.as_deref()).map(str::parse::<i64>);
        if let Some(Err(_)) = id {
            validator.error("id", "Must be an integer");
        }
        let expires = non_empty(self.expires.as_deref()).map(str::parse::<i64>);
        if let Some(Err(_)) = expires {
            validator.error("expires", "Must be an integer");
        }
        validator.finish()?;

        Ok(VerifyEmailCommand {
            id: id.and_then(Result::ok).unwrap_or_default(),
            hash: self.hash.unwrap_or_default(),
            expires: expires.and_then(Result::ok).unwrap_or_default(),
            signature: self.signature.unwrap_or_default(),
        })
    }
}

/// Profile update request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProfileCommand {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UpdateProfileRequest {
    pub fn into_command(self) -> IdentityResult<UpdateProfileCommand> {
        Validator::new()
            .field("name", self.name.as_deref(), &optional(name_rules()))
            .field("email", self.email.as_deref(), &optional(email_rules()))
            .finish()?;

        Ok(UpdateProfileCommand {
            name: self
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            email: self
                .email
                .map(|e| normalize_email(&e))
                .filter(|e| !e.is_empty()),
        })
    }
}

/// Account as shown to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
    pub permissions: Vec<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub state: AccountState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        AccountView {
            id: account.id,
            username: account.username.clone(),
            name: account.name.clone(),
            email: account.email.clone(),
            role: account.role,
            permissions: effective_permissions(account).into_iter().collect(),
            email_verified_at: account.email_verified_at,
            last_login_at: account.last_login_at,
            state: AccountState::of(account),
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Token listing entry; never includes the secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenView {
    pub id: i64,
    pub name: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub current: bool,
}

impl TokenView {
    pub fn new(token: &AccessToken, current_token_id: i64) -> Self {
        TokenView {
            id: token.id,
            name: token.name.clone(),
            last_used_at: token.last_used_at,
            expires_at: token.expires_at,
            created_at: token.created_at,
            current: token.id == current_token_id,
        }
    }
}

/// Successful login or registration with a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub account: AccountView,
    pub token: String,
    pub token_type: String,
}

impl AuthResponse {
    pub fn new(account: &Account, token: &IssuedToken) -> Self {
        AuthResponse {
            account: AccountView::from(account),
            token: token.plaintext.clone(),
            token_type: "Bearer".to_string(),
        }
    }
}

/// Registration result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub account: AccountView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub verification_required: bool,
}

/// Plain acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        MessageResponse {
            message: message.into(),
        }
    }
}
