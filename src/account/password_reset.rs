/// Single-use password reset tokens, one per email
use crate::{
    account::store::AccountStore,
    clock::Clock,
    crypto::{generate_secret, hash_token, verify_token_hash, RandomSource},
    db::account::{to_db_timestamp, Account, PasswordResetRecord},
    error::{IdentityError, IdentityResult},
    validation::normalize_email,
};
use chrono::Duration;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

pub const RESET_TOKEN_LENGTH: usize = 64;

/// Password reset token store
#[derive(Clone)]
pub struct PasswordResetTokenStore {
    db: SqlitePool,
    accounts: AccountStore,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    ttl: Duration,
}

impl PasswordResetTokenStore {
    pub fn new(
        db: SqlitePool,
        accounts: AccountStore,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        ttl: Duration,
    ) -> Self {
        Self {
            db,
            accounts,
            clock,
            random,
            ttl,
        }
    }

    /// Issue a reset token, superseding any earlier one for the same email
    ///
    /// Succeeds whether or not an account uses this email.
    pub async fn create(&self, email: &str) -> IdentityResult<String> {
        let email = normalize_email(email);
        let token = generate_secret(self.random.as_ref(), RESET_TOKEN_LENGTH);

        let mut tx = self.db.begin().await?;

        self.delete_in(&mut tx, &email).await?;
        sqlx::query(
            "INSERT INTO password_reset_tokens (email, token_hash, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(&email)
        .bind(hash_token(&token))
        .bind(to_db_timestamp(self.clock.now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(token)
    }

    /// Check a token and delete it on success
    pub async fn verify_and_consume(&self, email: &str, token: &str) -> IdentityResult<Account> {
        let mut tx = self.db.begin().await?;
        let account = self.verify_and_consume_in(&mut tx, email, token).await?;
        tx.commit().await?;
        Ok(account)
    }

    /// Same as [`verify_and_consume`](Self::verify_and_consume) inside the caller's transaction
    pub async fn verify_and_consume_in(
        &self,
        conn: &mut SqliteConnection,
        email: &str,
        token: &str,
    ) -> IdentityResult<Account> {
        let email = normalize_email(email);

        let row = sqlx::query(
            "SELECT email, token_hash, created_at FROM password_reset_tokens WHERE email = ?1",
        )
        .bind(&email)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(IdentityError::InvalidOrExpiredToken)?;
        let record = PasswordResetRecord::from_row(&row)?;

        if !verify_token_hash(token, &record.token_hash) {
            tracing::warn!("Password reset token mismatch");
            return Err(IdentityError::InvalidOrExpiredToken);
        }

        if record.created_at + self.ttl <= self.clock.now() {
            tracing::debug!("Password reset token expired");
            return Err(IdentityError::InvalidOrExpiredToken);
        }

        let account = self
            .accounts
            .find_by_email_in(conn, &email)
            .await?
            .ok_or(IdentityError::AccountNotFound)?;

        self.delete_in(conn, &email).await?;

        Ok(account)
    }

    /// Drop any pending reset for an email
    pub async fn delete_in(&self, conn: &mut SqliteConnection, email: &str) -> IdentityResult<u64> {
        let result = sqlx::query("DELETE FROM password_reset_tokens WHERE email = ?1")
            .bind(normalize_email(email))
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete records older than the TTL
    pub async fn purge_expired(&self) -> IdentityResult<u64> {
        let cutoff = self.clock.now() - self.ttl;
        let result = sqlx::query("DELETE FROM password_reset_tokens WHERE created_at <= ?1")
            .bind(to_db_timestamp(cutoff))
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
