/// Application context and dependency injection
use crate::{
    account::{
        AccountLifecycleManager, AccountManager, AccountStore, PasswordResetTokenStore,
        SignedLinkVerifier, TokenStore,
    },
    admin::{AdminManager, AuditLog},
    clock::{Clock, SystemClock},
    config::ServerConfig,
    crypto::{Argon2Hasher, OsRandom, PasswordHasher, RandomSource},
    db,
    error::{IdentityError, IdentityResult},
    mailer::Mailer,
    rate_limit::RateLimiter,
};
use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub account_db: SqlitePool,
    pub clock: Arc<dyn Clock>,
    // Stores
    pub accounts: AccountStore,
    pub tokens: TokenStore,
    pub links: SignedLinkVerifier,
    pub resets: PasswordResetTokenStore,
    // Services
    pub lifecycle: AccountLifecycleManager,
    pub account_manager: Arc<AccountManager>,
    pub admin_manager: Arc<AdminManager>,
    // Rate limiter
    pub rate_limiter: RateLimiter,
    // Email mailer
    pub mailer: Mailer,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> IdentityResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let account_db =
            db::create_pool(&config.storage.account_db, db::DatabaseOptions::default()).await?;
        db::run_migrations(&account_db).await?;
        db::test_connection(&account_db).await?;

        let mailer = Mailer::new(config.email.clone())?;
        if !mailer.is_configured() {
            tracing::warn!("SMTP not configured; verification and reset emails will only be logged");
        }

        Ok(Self::from_parts(
            config,
            account_db,
            Arc::new(SystemClock),
            Arc::new(Argon2Hasher::new()),
            Arc::new(OsRandom),
            mailer,
        ))
    }

    /// Wire every service over an already migrated pool
    pub fn from_parts(
        config: ServerConfig,
        account_db: SqlitePool,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn PasswordHasher>,
        random: Arc<dyn RandomSource>,
        mailer: Mailer,
    ) -> Self {
        let config = Arc::new(config);
        let auth = &config.authentication;

        let accounts = AccountStore::new(account_db.clone(), clock.clone());
        let tokens = TokenStore::new(
            account_db.clone(),
            accounts.clone(),
            clock.clone(),
            random.clone(),
        );
        let links = SignedLinkVerifier::new(
            accounts.clone(),
            clock.clone(),
            &auth.app_key,
            Duration::minutes(auth.signed_link_ttl_minutes),
        );
        let resets = PasswordResetTokenStore::new(
            account_db.clone(),
            accounts.clone(),
            clock.clone(),
            random,
            Duration::minutes(auth.password_reset_ttl_minutes),
        );
        let lifecycle = AccountLifecycleManager::new(
            account_db.clone(),
            accounts.clone(),
            tokens.clone(),
            resets.clone(),
            clock.clone(),
        );

        let rate_limiter = RateLimiter::new(&config.rate_limit);

        let account_manager = Arc::new(AccountManager::new(
            account_db.clone(),
            config.clone(),
            accounts.clone(),
            tokens.clone(),
            links.clone(),
            resets.clone(),
            hasher.clone(),
            rate_limiter.clone(),
            mailer.clone(),
        ));
        let admin_manager = Arc::new(AdminManager::new(
            accounts.clone(),
            tokens.clone(),
            lifecycle.clone(),
            hasher,
            AuditLog::new(account_db.clone(), clock.clone()),
        ));

        Self {
            config,
            account_db,
            clock,
            accounts,
            tokens,
            links,
            resets,
            lifecycle,
            account_manager,
            admin_manager,
            rate_limiter,
            mailer,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> IdentityResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                IdentityError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
