/// Account manager: the session-facing entry points
///
/// Composes the stores, the lifecycle predicate, the hasher and the mailer
/// into registration, login, logout, verification and password flows.
use crate::{
    account::{
        lifecycle::is_authenticable,
        password_reset::PasswordResetTokenStore,
        signed_link::SignedLinkVerifier,
        store::{AccountStore, NewAccount, ProfileChanges},
        tokens::{IssuedToken, TokenStore},
        ChangePasswordCommand, LoginCommand, RegisterCommand, ResetPasswordCommand,
        UpdateProfileCommand, VerifyEmailCommand,
    },
    admin::roles::Role,
    config::ServerConfig,
    crypto::password::{hash_blocking, verify_blocking, PasswordHasher},
    db::account::{AccessToken, Account},
    error::{IdentityError, IdentityResult},
    mailer::Mailer,
    metrics,
    rate_limit::{RateLimitBucket, RateLimiter},
};
use chrono::Duration;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;

const LOGIN_TOKEN_LABEL: &str = "login";
const ADMIN_TOKEN_LABEL: &str = "admin-login";
const REGISTRATION_TOKEN_LABEL: &str = "registration";

/// Result of a registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub account: Account,
    /// Present only when the new account could log in right away
    pub token: Option<IssuedToken>,
}

/// An account together with a freshly issued bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub account: Account,
    pub token: IssuedToken,
}

/// Outcome of following a verification link
#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    Verified(Account),
    AlreadyVerified(Account),
}

impl VerificationOutcome {
    pub fn account(&self) -> &Account {
        match self {
            VerificationOutcome::Verified(account) | VerificationOutcome::AlreadyVerified(account) => {
                account
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginKind {
    User,
    Admin,
}

impl LoginKind {
    fn as_str(&self) -> &'static str {
        match self {
            LoginKind::User => "user",
            LoginKind::Admin => "admin",
        }
    }
}

/// Account manager service
#[derive(Clone)]
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
    accounts: AccountStore,
    tokens: TokenStore,
    links: SignedLinkVerifier,
    resets: PasswordResetTokenStore,
    hasher: Arc<dyn PasswordHasher>,
    rate_limiter: RateLimiter,
    mailer: Mailer,
}

impl AccountManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        config: Arc<ServerConfig>,
        accounts: AccountStore,
        tokens: TokenStore,
        links: SignedLinkVerifier,
        resets: PasswordResetTokenStore,
        hasher: Arc<dyn PasswordHasher>,
        rate_limiter: RateLimiter,
        mailer: Mailer,
    ) -> Self {
        Self {
            db,
            config,
            accounts,
            tokens,
            links,
            resets,
            hasher,
            rate_limiter,
            mailer,
        }
    }

    /// Whether this account must verify its email before logging in
    pub fn requires_verification(&self, account: &Account) -> bool {
        self.config.authentication.require_email_verification && account.role == Role::User
    }

    fn token_ttl(&self) -> Option<Duration> {
        self.config
            .authentication
            .token_ttl_minutes
            .map(Duration::minutes)
    }

    /// Register a new `user` account and send its verification link
    pub async fn register(&self, cmd: RegisterCommand) -> IdentityResult<Registration> {
        if self.accounts.username_exists(&cmd.username).await? {
            return Err(IdentityError::Conflict("Username already taken".to_string()));
        }
        if self.accounts.email_taken(&cmd.email, None).await? {
            return Err(IdentityError::Conflict("Email already registered".to_string()));
        }

        let password_hash = hash_blocking(self.hasher.clone(), cmd.password).await?;

        let account = self
            .accounts
            .create(NewAccount {
                username: cmd.username,
                name: cmd.name,
                email: Some(cmd.email),
                password_hash,
                role: Role::User,
                permissions: BTreeSet::new(),
                email_verified: false,
            })
            .await?;

        metrics::record_account_creation(Role::User.as_str());
        tracing::info!(account_id = account.id, username = %account.username, "Account registered");

        self.send_verification_link(&account).await;

        let token = if self.requires_verification(&account) {
            None
        } else {
            Some(
                self.tokens
                    .issue(account.id, REGISTRATION_TOKEN_LABEL, self.token_ttl())
                    .await?,
            )
        };

        Ok(Registration { account, token })
    }

    /// Check credentials and issue a session token
    pub async fn login(&self, cmd: LoginCommand) -> IdentityResult<AuthenticatedSession> {
        let account = self.authenticate(&cmd, LoginKind::User).await?;
        self.start_session(account, LOGIN_TOKEN_LABEL).await
    }

    /// Login restricted to admin roles; no verification gating applies
    pub async fn admin_login(&self, cmd: LoginCommand) -> IdentityResult<AuthenticatedSession> {
        let account = self.authenticate(&cmd, LoginKind::Admin).await?;
        self.start_session(account, ADMIN_TOKEN_LABEL).await
    }

    async fn authenticate(&self, cmd: &LoginCommand, kind: LoginKind) -> IdentityResult<Account> {
        self.rate_limiter.check(RateLimitBucket::Login, &cmd.login)?;

        let outcome = self.check_credentials(cmd, kind).await;
        let label = match &outcome {
            Ok(_) => "success",
            Err(IdentityError::EmailNotVerified) => "unverified",
            Err(IdentityError::InvalidCredentials) => "invalid_credentials",
            Err(_) => "error",
        };
        metrics::record_login(kind.as_str(), label);

        if let Err(IdentityError::InvalidCredentials) = &outcome {
            tracing::warn!(kind = kind.as_str(), "Rejected login attempt");
        }
        outcome
    }

    async fn check_credentials(&self, cmd: &LoginCommand, kind: LoginKind) -> IdentityResult<Account> {
        let Some(account) = self.accounts.find_by_login(&cmd.login).await? else {
            return Err(IdentityError::InvalidCredentials);
        };

        let valid = verify_blocking(
            self.hasher.clone(),
            cmd.password.clone(),
            account.password_hash.clone(),
        )
        .await?;
        if !valid {
            return Err(IdentityError::InvalidCredentials);
        }

        // Suspended accounts look exactly like bad credentials
        if !is_authenticable(&account) {
            return Err(IdentityError::InvalidCredentials);
        }

        match kind {
            LoginKind::Admin if !account.role.is_admin() => Err(IdentityError::InvalidCredentials),
            LoginKind::User if self.requires_verification(&account) && !account.is_email_verified() => {
                Err(IdentityError::EmailNotVerified)
            }
            _ => Ok(account),
        }
    }

    async fn start_session(&self, account: Account, label: &str) -> IdentityResult<AuthenticatedSession> {
        self.accounts.touch_last_login(account.id).await?;
        let token = self.tokens.issue(account.id, label, self.token_ttl()).await?;
        let account = self.accounts.require(account.id).await?;

        tracing::info!(account_id = account.id, token_id = token.id, "Login succeeded");
        Ok(AuthenticatedSession { account, token })
    }

    /// Revoke the token the request was made with
    pub async fn logout(&self, token_id: i64) -> IdentityResult<()> {
        self.tokens.revoke(token_id).await
    }

    /// Revoke every token of an account
    pub async fn logout_all(&self, account_id: i64) -> IdentityResult<u64> {
        let count = self.tokens.revoke_all(account_id).await?;
        tracing::info!(account_id, count, "Logged out of all sessions");
        Ok(count)
    }

    /// Tokens held by an account
    pub async fn list_tokens(&self, account_id: i64) -> IdentityResult<Vec<AccessToken>> {
        self.tokens.list_for_account(account_id).await
    }

    /// Change password; every other session of the account is revoked
    pub async fn change_password(
        &self,
        account: &Account,
        current_token_id: i64,
        cmd: ChangePasswordCommand,
    ) -> IdentityResult<()> {
        self.rate_limiter
            .check(RateLimitBucket::ChangePassword, &account.id.to_string())?;

        let current_ok = verify_blocking(
            self.hasher.clone(),
            cmd.current_password.clone(),
            account.password_hash.clone(),
        )
        .await?;
        if !current_ok {
            return Err(IdentityError::CurrentPasswordIncorrect);
        }
        if cmd.new_password == cmd.current_password {
            return Err(IdentityError::SamePassword);
        }

        let password_hash = hash_blocking(self.hasher.clone(), cmd.new_password).await?;

        let mut tx = self.db.begin().await?;
        self.accounts
            .set_password_in(&mut tx, account.id, &password_hash)
            .await?;
        let revoked = self
            .tokens
            .revoke_all_except_in(&mut tx, account.id, current_token_id)
            .await?;
        tx.commit().await?;

        tracing::info!(account_id = account.id, revoked, "Password changed");
        Ok(())
    }

    /// Start a password reset; the outcome never reveals whether the email exists
    pub async fn forgot_password(&self, email: &str) -> IdentityResult<()> {
        self.rate_limiter.check(RateLimitBucket::PasswordReset, email)?;

        let account = match self.accounts.find_by_email(email).await? {
            Some(account) if is_authenticable(&account) => account,
            _ => {
                tracing::debug!("Password reset requested for unknown or suspended email");
                return Ok(());
            }
        };

        let token = self.resets.create(email).await?;
        if let Err(e) = self
            .mailer
            .send_password_reset_email(
                email,
                &account.name,
                &token,
                self.config.authentication.password_reset_ttl_minutes,
            )
            .await
        {
            tracing::error!(account_id = account.id, "Failed to send password reset email: {}", e);
        }

        Ok(())
    }

    /// Consume a reset token, set the new password and revoke every session
    ///
    /// Throttled per email, and the new password is only hashed once the
    /// token has been accepted. A hashing failure rolls the consume back.
    pub async fn reset_password(&self, cmd: ResetPasswordCommand) -> IdentityResult<Account> {
        self.rate_limiter
            .check(RateLimitBucket::ResetSubmit, &cmd.email)?;

        let mut tx = self.db.begin().await?;
        let account = self
            .resets
            .verify_and_consume_in(&mut tx, &cmd.email, &cmd.token)
            .await?;
        let password_hash = hash_blocking(self.hasher.clone(), cmd.password).await?;
        self.accounts
            .set_password_in(&mut tx, account.id, &password_hash)
            .await?;
        let revoked = self.tokens.revoke_all_in(&mut tx, account.id).await?;
        tx.commit().await?;

        tracing::info!(account_id = account.id, revoked, "Password reset");
        self.accounts.require(account.id).await
    }

    /// Follow a signed verification link
    pub async fn verify_email(&self, cmd: VerifyEmailCommand) -> IdentityResult<VerificationOutcome> {
        let account = self
            .links
            .verify(cmd.id, &cmd.hash, cmd.expires, &cmd.signature)
            .await?;

        if account.is_email_verified() || !self.accounts.mark_verified(account.id).await? {
            return Ok(VerificationOutcome::AlreadyVerified(account));
        }

        tracing::info!(account_id = account.id, "Email verified");
        let account = self.accounts.require(account.id).await?;
        Ok(VerificationOutcome::Verified(account))
    }

    /// Send a fresh verification link; silent for unknown or verified emails
    pub async fn resend_verification(&self, email: &str) -> IdentityResult<()> {
        self.rate_limiter.check(RateLimitBucket::Verification, email)?;

        match self.accounts.find_by_email(email).await? {
            Some(account) if is_authenticable(&account) && !account.is_email_verified() => {
                self.send_verification_link(&account).await;
            }
            _ => tracing::debug!("Verification resend skipped"),
        }

        Ok(())
    }

    /// Update the caller's own name or email
    pub async fn update_profile(
        &self,
        account: &Account,
        cmd: UpdateProfileCommand,
    ) -> IdentityResult<Account> {
        if let Some(email) = &cmd.email {
            if self.accounts.email_taken(email, Some(account.id)).await? {
                return Err(IdentityError::Conflict("Email already registered".to_string()));
            }
        }

        let was_verified = account.is_email_verified();
        let updated = self
            .accounts
            .update_profile(
                account.id,
                ProfileChanges {
                    name: cmd.name,
                    email: cmd.email,
                },
            )
            .await?;

        let email_changed = updated.email != account.email;
        if email_changed && (was_verified || !updated.is_email_verified()) {
            self.send_verification_link(&updated).await;
        }

        Ok(updated)
    }

    /// Mail a verification link; delivery failures are logged, not returned
    async fn send_verification_link(&self, account: &Account) {
        let Some(email) = account.email.as_deref() else {
            return;
        };

        let link = match self.links.link_for(account) {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(account_id = account.id, "Cannot build verification link: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .mailer
            .send_verification_email(
                email,
                &account.name,
                &link.to_url(&self.config.service.public_url),
                self.config.authentication.signed_link_ttl_minutes,
            )
            .await
        {
            tracing::error!(account_id = account.id, "Failed to send verification email: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::signed_link::SignedLink;
    use crate::clock::testing::FixedClock;
    use crate::clock::Clock;
    use crate::crypto::testing::CountingRandom;
    use crate::crypto::{identifier_hash, Argon2Hasher, RandomSource};
    use crate::db::connect_in_memory;

    struct Fixture {
        db: SqlitePool,
        manager: AccountManager,
        accounts: AccountStore,
        tokens: TokenStore,
        links: SignedLinkVerifier,
        resets: PasswordResetTokenStore,
        clock: Arc<FixedClock>,
    }

    async fn setup_with(config: ServerConfig) -> Fixture {
        let pool = connect_in_memory().await.unwrap();
        let config = Arc::new(config);
        let fixed = Arc::new(FixedClock::default());
        let clock: Arc<dyn Clock> = fixed.clone();
        let random: Arc<dyn RandomSource> = Arc::new(CountingRandom::default());

        let accounts = AccountStore::new(pool.clone(), clock.clone());
        let tokens = TokenStore::new(pool.clone(), accounts.clone(), clock.clone(), random.clone());
        let links = SignedLinkVerifier::new(
            accounts.clone(),
            clock.clone(),
            &config.authentication.app_key,
            Duration::minutes(config.authentication.signed_link_ttl_minutes),
        );
        let resets = PasswordResetTokenStore::new(
            pool.clone(),
            accounts.clone(),
            clock,
            random,
            Duration::minutes(config.authentication.password_reset_ttl_minutes),
        );
        let manager = AccountManager::new(
            pool.clone(),
            config.clone(),
            accounts.clone(),
            tokens.clone(),
            links.clone(),
            resets.clone(),
            Arc::new(Argon2Hasher::fast().unwrap()),
            RateLimiter::new(&config.rate_limit),
            Mailer::disabled(),
        );

        Fixture {
            db: pool,
            manager,
            accounts,
            tokens,
            links,
            resets,
            clock: fixed,
        }
    }

    async fn setup() -> Fixture {
        setup_with(ServerConfig::for_testing()).await
    }

    fn register_cmd(username: &str) -> RegisterCommand {
        RegisterCommand {
            username: username.to_string(),
            name: username.to_string(),
            email: format!("{}@example.com", username),
            password: "password123".to_string(),
        }
    }

    fn login_cmd(login: &str, password: &str) -> LoginCommand {
        LoginCommand {
            login: login.to_string(),
            password: password.to_string(),
        }
    }

    fn verify_cmd(link: &SignedLink) -> VerifyEmailCommand {
        VerifyEmailCommand {
            id: link.id,
            hash: link.hash.clone(),
            expires: link.expires,
            signature: link.signature.clone(),
        }
    }

    async fn registered_and_verified(f: &Fixture, username: &str) -> Account {
        let registration = f.manager.register(register_cmd(username)).await.unwrap();
        f.accounts.mark_verified(registration.account.id).await.unwrap();
        f.accounts.require(registration.account.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_register_then_login_requires_verification() {
        let f = setup().await;

        let registration = f.manager.register(register_cmd("bob")).await.unwrap();
        assert!(registration.account.email_verified_at.is_none());
        assert_eq!(registration.account.role, Role::User);
        assert!(registration.token.is_none());

        assert!(matches!(
            f.manager.login(login_cmd("bob", "password123")).await,
            Err(IdentityError::EmailNotVerified)
        ));
    }

    #[tokio::test]
    async fn test_register_without_verification_issues_token() {
        let mut config = ServerConfig::for_testing();
        config.authentication.require_email_verification = false;
        let f = setup_with(config).await;

        let registration = f.manager.register(register_cmd("bob")).await.unwrap();
        let token = registration.token.unwrap();
        assert!(f.tokens.validate(&token.plaintext).await.is_ok());

        assert!(f.manager.login(login_cmd("bob", "password123")).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_conflicts() {
        let f = setup().await;
        f.manager.register(register_cmd("bob")).await.unwrap();

        assert!(matches!(
            f.manager.register(register_cmd("bob")).await,
            Err(IdentityError::Conflict(_))
        ));

        let mut cmd = register_cmd("robert");
        cmd.email = "bob@example.com".to_string();
        assert!(matches!(
            f.manager.register(cmd).await,
            Err(IdentityError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let f = setup().await;
        registered_and_verified(&f, "bob").await;

        let unknown = f.manager.login(login_cmd("nobody", "password123")).await;
        let wrong = f.manager.login(login_cmd("bob", "wrong-password")).await;

        assert!(matches!(unknown, Err(IdentityError::InvalidCredentials)));
        assert!(matches!(wrong, Err(IdentityError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_login_success_stamps_last_login() {
        let f = setup().await;
        registered_and_verified(&f, "bob").await;

        let session = f
            .manager
            .login(login_cmd("bob@example.com", "password123"))
            .await
            .unwrap();
        assert!(session.account.last_login_at.is_some());

        let validated = f.tokens.validate(&session.token.plaintext).await.unwrap();
        assert_eq!(validated.account.id, session.account.id);
    }

    #[tokio::test]
    async fn test_suspended_account_cannot_login() {
        let f = setup().await;
        let bob = registered_and_verified(&f, "bob").await;

        sqlx::query("UPDATE accounts SET deleted_at = '2025-03-01T12:00:00Z' WHERE id = ?1")
            .bind(bob.id)
            .execute(&f.manager.db)
            .await
            .unwrap();

        assert!(matches!(
            f.manager.login(login_cmd("bob", "password123")).await,
            Err(IdentityError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_login_is_rate_limited() {
        let f = setup().await;
        let limit = ServerConfig::for_testing().rate_limit.login.max_attempts;

        for _ in 0..limit {
            assert!(matches!(
                f.manager.login(login_cmd("bob", "bad")).await,
                Err(IdentityError::InvalidCredentials)
            ));
        }
        assert!(matches!(
            f.manager.login(login_cmd("bob", "bad")).await,
            Err(IdentityError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_admin_login() {
        let f = setup().await;
        let bob = registered_and_verified(&f, "bob").await;

        assert!(matches!(
            f.manager.admin_login(login_cmd("bob", "password123")).await,
            Err(IdentityError::InvalidCredentials)
        ));

        // Admins log in without a verified email
        sqlx::query("UPDATE accounts SET role = 'admin', email_verified_at = NULL WHERE id = ?1")
            .bind(bob.id)
            .execute(&f.manager.db)
            .await
            .unwrap();
        let session = f
            .manager
            .admin_login(login_cmd("bob", "password123"))
            .await
            .unwrap();
        assert_eq!(session.account.role, Role::Admin);
        assert!(f.manager.login(login_cmd("bob", "password123")).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_and_logout_all() {
        let f = setup().await;
        registered_and_verified(&f, "bob").await;

        let s1 = f.manager.login(login_cmd("bob", "password123")).await.unwrap();
        let s2 = f.manager.login(login_cmd("bob", "password123")).await.unwrap();

        f.manager.logout(s1.token.id).await.unwrap();
        assert!(f.tokens.validate(&s1.token.plaintext).await.is_err());
        assert!(f.tokens.validate(&s2.token.plaintext).await.is_ok());

        assert_eq!(f.manager.logout_all(s2.account.id).await.unwrap(), 1);
        assert!(f.tokens.validate(&s2.token.plaintext).await.is_err());
    }

    #[tokio::test]
    async fn test_change_password_keeps_current_session_only() {
        let f = setup().await;
        registered_and_verified(&f, "bob").await;
        let current = f.manager.login(login_cmd("bob", "password123")).await.unwrap();
        let other = f.manager.login(login_cmd("bob", "password123")).await.unwrap();

        f.manager
            .change_password(
                &current.account,
                current.token.id,
                ChangePasswordCommand {
                    current_password: "password123".to_string(),
                    new_password: "new-password-456".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(f.tokens.validate(&current.token.plaintext).await.is_ok());
        assert!(f.tokens.validate(&other.token.plaintext).await.is_err());
        assert!(f
            .manager
            .login(login_cmd("bob", "new-password-456"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_change_password_rejections() {
        let f = setup().await;
        registered_and_verified(&f, "bob").await;
        let session = f.manager.login(login_cmd("bob", "password123")).await.unwrap();

        assert!(matches!(
            f.manager
                .change_password(
                    &session.account,
                    session.token.id,
                    ChangePasswordCommand {
                        current_password: "not-my-password".to_string(),
                        new_password: "new-password-456".to_string(),
                    },
                )
                .await,
            Err(IdentityError::CurrentPasswordIncorrect)
        ));
        assert!(matches!(
            f.manager
                .change_password(
                    &session.account,
                    session.token.id,
                    ChangePasswordCommand {
                        current_password: "password123".to_string(),
                        new_password: "password123".to_string(),
                    },
                )
                .await,
            Err(IdentityError::SamePassword)
        ));
    }

    #[tokio::test]
    async fn test_reset_password_flow() {
        let f = setup().await;
        registered_and_verified(&f, "alice").await;
        let session = f.manager.login(login_cmd("alice", "password123")).await.unwrap();

        // The mailer is disabled, so mint the token directly
        let token = f.resets.create("alice@example.com").await.unwrap();
        let cmd = ResetPasswordCommand {
            email: "alice@example.com".to_string(),
            token: token.clone(),
            password: "brand-new-pass".to_string(),
        };

        f.manager.reset_password(cmd.clone()).await.unwrap();
        assert!(f.tokens.validate(&session.token.plaintext).await.is_err());
        assert!(f
            .manager
            .login(login_cmd("alice", "brand-new-pass"))
            .await
            .is_ok());

        assert!(matches!(
            f.manager.reset_password(cmd).await,
            Err(IdentityError::InvalidOrExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_failed_reset_changes_nothing() {
        let f = setup().await;
        registered_and_verified(&f, "alice").await;
        let token = f.resets.create("alice@example.com").await.unwrap();

        let result = f
            .manager
            .reset_password(ResetPasswordCommand {
                email: "alice@example.com".to_string(),
                token: format!("{}x", token),
                password: "brand-new-pass".to_string(),
            })
            .await;
        assert!(matches!(result, Err(IdentityError::InvalidOrExpiredToken)));

        assert!(f.manager.login(login_cmd("alice", "password123")).await.is_ok());
        // The genuine token is still usable
        assert!(f
            .resets
            .verify_and_consume("alice@example.com", &token)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_reset_password_is_rate_limited_per_email() {
        let mut config = ServerConfig::for_testing();
        config.rate_limit.reset_submit.max_attempts = 2;
        let f = setup_with(config).await;
        registered_and_verified(&f, "alice").await;
        registered_and_verified(&f, "carol").await;
        let token = f.resets.create("alice@example.com").await.unwrap();

        let guess = |email: &str| ResetPasswordCommand {
            email: email.to_string(),
            token: "guessed-token".to_string(),
            password: "brand-new-pass".to_string(),
        };

        for _ in 0..2 {
            assert!(matches!(
                f.manager.reset_password(guess("alice@example.com")).await,
                Err(IdentityError::InvalidOrExpiredToken)
            ));
        }
        assert!(matches!(
            f.manager.reset_password(guess("ALICE@example.com")).await,
            Err(IdentityError::RateLimited { .. })
        ));

        // Even the genuine token waits out the window
        let genuine = ResetPasswordCommand {
            token,
            ..guess("alice@example.com")
        };
        assert!(matches!(
            f.manager.reset_password(genuine).await,
            Err(IdentityError::RateLimited { .. })
        ));

        // Other emails keep their own allowance
        assert!(matches!(
            f.manager.reset_password(guess("carol@example.com")).await,
            Err(IdentityError::InvalidOrExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_verify_email_for_suspended_account_is_not_found() {
        let f = setup().await;
        let registration = f.manager.register(register_cmd("bob")).await.unwrap();
        let link = f.links.link_for(&registration.account).unwrap();

        let lifecycle = crate::account::lifecycle::AccountLifecycleManager::new(
            f.db.clone(),
            f.accounts.clone(),
            f.tokens.clone(),
            f.resets.clone(),
            f.clock.clone(),
        );
        lifecycle.suspend(registration.account.id, 9999).await.unwrap();

        assert!(matches!(
            f.manager.verify_email(verify_cmd(&link)).await,
            Err(IdentityError::NotFound(_))
        ));
        let stored = f.accounts.require(registration.account.id).await.unwrap();
        assert!(!stored.is_email_verified());
    }

    #[tokio::test]
    async fn test_forgot_password_always_succeeds() {
        let f = setup().await;
        registered_and_verified(&f, "alice").await;

        f.manager.forgot_password("alice@example.com").await.unwrap();
        f.manager.forgot_password("nobody@example.com").await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_email_then_already_verified() {
        let f = setup().await;
        let registration = f.manager.register(register_cmd("bob")).await.unwrap();
        let link = f.links.link_for(&registration.account).unwrap();

        match f.manager.verify_email(verify_cmd(&link)).await.unwrap() {
            VerificationOutcome::Verified(account) => assert!(account.is_email_verified()),
            other => panic!("expected Verified, got {:?}", other),
        }
        assert!(matches!(
            f.manager.verify_email(verify_cmd(&link)).await.unwrap(),
            VerificationOutcome::AlreadyVerified(_)
        ));

        assert!(f.manager.login(login_cmd("bob", "password123")).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_email_rejects_expired_link() {
        let f = setup().await;
        let registration = f.manager.register(register_cmd("bob")).await.unwrap();
        let link = f.links.link_for(&registration.account).unwrap();

        f.clock.advance(Duration::minutes(120));
        assert!(matches!(
            f.manager.verify_email(verify_cmd(&link)).await,
            Err(IdentityError::InvalidLink)
        ));
    }

    #[tokio::test]
    async fn test_update_profile_email_change_requires_reverification() {
        let f = setup().await;
        let bob = registered_and_verified(&f, "bob").await;
        f.manager.register(register_cmd("carol")).await.unwrap();

        assert!(matches!(
            f.manager
                .update_profile(
                    &bob,
                    UpdateProfileCommand {
                        name: None,
                        email: Some("carol@example.com".to_string()),
                    },
                )
                .await,
            Err(IdentityError::Conflict(_))
        ));

        let updated = f
            .manager
            .update_profile(
                &bob,
                UpdateProfileCommand {
                    name: Some("Robert".to_string()),
                    email: Some("robert@example.com".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Robert");
        assert!(updated.email_verified_at.is_none());

        // A link minted for the old address no longer verifies
        let stale = f
            .links
            .build_link(bob.id, &identifier_hash("bob@example.com"), None);
        assert!(matches!(
            f.manager.verify_email(verify_cmd(&stale)).await,
            Err(IdentityError::InvalidLink)
        ));
    }

    #[tokio::test]
    async fn test_resend_verification_is_silent() {
        let f = setup().await;
        f.manager.register(register_cmd("bob")).await.unwrap();

        f.manager.resend_verification("bob@example.com").await.unwrap();
        f.manager.resend_verification("ghost@example.com").await.unwrap();
    }
}
