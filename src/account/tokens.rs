/// Bearer session tokens
///
/// Wire format is `"{token_id}|{secret}"`. The secret is 40 alphanumeric
/// characters, returned once at issuance; only its SHA-256 is stored.
use crate::{
    account::{lifecycle::is_authenticable, store::AccountStore},
    clock::Clock,
    crypto::{generate_secret, hash_token, verify_token_hash, RandomSource},
    db::account::{to_db_timestamp, AccessToken, Account},
    error::{IdentityError, IdentityResult},
    metrics,
};
use chrono::Duration;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

pub const TOKEN_SECRET_LENGTH: usize = 40;
const TOKEN_SEPARATOR: char = '|';

/// A freshly issued token; `plaintext` is never retrievable again
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub id: i64,
    pub plaintext: String,
}

/// The account behind a validated bearer token
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub account: Account,
    pub token_id: i64,
}

/// Split a wire token into id and secret
fn parse_token(token: &str) -> Option<(i64, &str)> {
    let (id, secret) = token.split_once(TOKEN_SEPARATOR)?;
    let id: i64 = id.parse().ok()?;
    if id <= 0 || secret.is_empty() {
        return None;
    }
    Some((id, secret))
}

/// Token store
#[derive(Clone)]
pub struct TokenStore {
    db: SqlitePool,
    accounts: AccountStore,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl TokenStore {
    pub fn new(
        db: SqlitePool,
        accounts: AccountStore,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            db,
            accounts,
            clock,
            random,
        }
    }

    /// Issue a new token for an account
    pub async fn issue(
        &self,
        account_id: i64,
        label: &str,
        ttl: Option<Duration>,
    ) -> IdentityResult<IssuedToken> {
        let now = self.clock.now();
        let secret = generate_secret(self.random.as_ref(), TOKEN_SECRET_LENGTH);
        let expires_at = ttl.map(|ttl| to_db_timestamp(now + ttl));

        let result = sqlx::query(
            "INSERT INTO access_tokens (account_id, name, token_hash, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(account_id)
        .bind(label)
        .bind(hash_token(&secret))
        .bind(expires_at)
        .bind(to_db_timestamp(now))
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        metrics::record_token_issued();
        tracing::debug!(account_id, token_id = id, label, "Issued access token");

        Ok(IssuedToken {
            id,
            plaintext: format!("{}{}{}", id, TOKEN_SEPARATOR, secret),
        })
    }

    /// Resolve a wire token to its account
    ///
    /// The owner's lifecycle state is re-read on every call, so a suspension
    /// takes effect on the very next request.
    pub async fn validate(&self, token: &str) -> IdentityResult<ValidatedToken> {
        let (token_id, secret) = parse_token(token).ok_or(IdentityError::InvalidToken)?;

        let row = sqlx::query(
            "SELECT id, account_id, name, token_hash, last_used_at, expires_at, created_at
             FROM access_tokens WHERE id = ?1",
        )
        .bind(token_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(IdentityError::InvalidToken)?;
        let record = AccessToken::from_row(&row)?;

        if !verify_token_hash(secret, &record.token_hash) {
            tracing::warn!(token_id, "Access token secret mismatch");
            return Err(IdentityError::InvalidToken);
        }

        let now = self.clock.now();
        if record.is_expired(now) {
            return Err(IdentityError::InvalidToken);
        }

        let account = match self.accounts.get(record.account_id).await? {
            Some(account) if is_authenticable(&account) => account,
            _ => return Err(IdentityError::Unauthenticated),
        };

        sqlx::query("UPDATE access_tokens SET last_used_at = ?1 WHERE id = ?2")
            .bind(to_db_timestamp(now))
            .bind(token_id)
            .execute(&self.db)
            .await?;

        Ok(ValidatedToken { account, token_id })
    }

    /// Revoke one token; revoking an unknown token is not an error
    pub async fn revoke(&self, token_id: i64) -> IdentityResult<()> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE id = ?1")
            .bind(token_id)
            .execute(&self.db)
            .await?;

        metrics::record_tokens_revoked("logout", result.rows_affected());
        Ok(())
    }

    /// Revoke every token of an account, returning how many were removed
    pub async fn revoke_all(&self, account_id: i64) -> IdentityResult<u64> {
        let mut conn = self.db.acquire().await?;
        self.revoke_all_in(&mut conn, account_id).await
    }

    pub async fn revoke_all_in(
        &self,
        conn: &mut SqliteConnection,
        account_id: i64,
    ) -> IdentityResult<u64> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE account_id = ?1")
            .bind(account_id)
            .execute(&mut *conn)
            .await?;

        let count = result.rows_affected();
        metrics::record_tokens_revoked("revoke_all", count);
        tracing::debug!(account_id, count, "Revoked all access tokens");
        Ok(count)
    }

    /// Revoke every token of an account except `keep_token_id`
    pub async fn revoke_all_except(&self, account_id: i64, keep_token_id: i64) -> IdentityResult<u64> {
        let mut conn = self.db.acquire().await?;
        self.revoke_all_except_in(&mut conn, account_id, keep_token_id)
            .await
    }

    pub async fn revoke_all_except_in(
        &self,
        conn: &mut SqliteConnection,
        account_id: i64,
        keep_token_id: i64,
    ) -> IdentityResult<u64> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE account_id = ?1 AND id != ?2")
            .bind(account_id)
            .bind(keep_token_id)
            .execute(&mut *conn)
            .await?;

        let count = result.rows_affected();
        metrics::record_tokens_revoked("revoke_others", count);
        Ok(count)
    }

    /// Delete tokens whose expiry has passed
    pub async fn purge_expired(&self) -> IdentityResult<u64> {
        let result = sqlx::query(
            "DELETE FROM access_tokens WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        )
        .bind(to_db_timestamp(self.clock.now()))
        .execute(&self.db)
        .await?;

        let count = result.rows_affected();
        metrics::record_tokens_revoked("expired", count);
        Ok(count)
    }

    /// Tokens currently held by an account, newest first
    pub async fn list_for_account(&self, account_id: i64) -> IdentityResult<Vec<AccessToken>> {
        let rows = sqlx::query(
            "SELECT id, account_id, name, token_hash, last_used_at, expires_at, created_at
             FROM access_tokens WHERE account_id = ?1
             ORDER BY id DESC",
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(AccessToken::from_row).collect()
    }
}
