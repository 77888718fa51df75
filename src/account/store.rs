/// Account persistence
///
/// Row-level reads and writes for the `accounts` table. Lifecycle rules and
/// authorization live elsewhere; this layer only enforces the data invariants
/// (unique username/email, a changed email clears verification).
use crate::{
    admin::roles::Role,
    clock::Clock,
    db::account::{encode_permissions, to_db_timestamp, Account, ACCOUNT_COLUMNS},
    error::{IdentityError, IdentityResult},
};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Fields for a new account row
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub permissions: BTreeSet<String>,
    pub email_verified: bool,
}

/// Profile fields that may change after creation
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub email: Option<String>,
}

fn conflict_on_unique(err: sqlx::Error) -> IdentityError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            let message = db_err.message();
            if message.contains("email") {
                IdentityError::Conflict("Email already registered".to_string())
            } else {
                IdentityError::Conflict("Username already taken".to_string())
            }
        }
        _ => IdentityError::Database(err),
    }
}

/// Account store
#[derive(Clone)]
pub struct AccountStore {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl AccountStore {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Load an account whatever its lifecycle state
    pub async fn get(&self, id: i64) -> IdentityResult<Option<Account>> {
        let mut conn = self.db.acquire().await?;
        self.get_in(&mut conn, id).await
    }

    pub async fn get_in(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
    ) -> IdentityResult<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(Account::from_row).transpose()
    }

    /// Load an account only if it is not suspended
    pub async fn get_active(&self, id: i64) -> IdentityResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = ?1 AND deleted_at IS NULL",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Account::from_row).transpose()
    }

    /// Load an account or fail with `NotFound`
    pub async fn require(&self, id: i64) -> IdentityResult<Account> {
        self.get(id)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("Account {} not found", id)))
    }

    pub async fn find_by_username(&self, username: &str) -> IdentityResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE username = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(username.trim())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Account::from_row).transpose()
    }

    pub async fn find_by_email(&self, email: &str) -> IdentityResult<Option<Account>> {
        let mut conn = self.db.acquire().await?;
        self.find_by_email_in(&mut conn, email).await
    }

    pub async fn find_by_email_in(
        &self,
        conn: &mut SqliteConnection,
        email: &str,
    ) -> IdentityResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE email = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(email.trim())
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(Account::from_row).transpose()
    }

    /// Look up by username, or by email when the identifier contains `@`
    pub async fn find_by_login(&self, login: &str) -> IdentityResult<Option<Account>> {
        if login.contains('@') {
            self.find_by_email(login).await
        } else {
            self.find_by_username(login).await
        }
    }

    pub async fn username_exists(&self, username: &str) -> IdentityResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE username = ?1")
            .bind(username.trim())
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    /// Whether another account already uses this email
    pub async fn email_taken(&self, email: &str, excluding: Option<i64>) -> IdentityResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM accounts WHERE email = ?1 AND (?2 IS NULL OR id != ?2)",
        )
        .bind(email.trim())
        .bind(excluding)
        .fetch_one(&self.db)
        .await?;

        Ok(count > 0)
    }

    /// Insert a new account row
    pub async fn create(&self, new: NewAccount) -> IdentityResult<Account> {
        let now = to_db_timestamp(self.clock.now());
        let verified_at = new.email_verified.then(|| now.clone());

        let result = sqlx::query(
            "INSERT INTO accounts (username, name, email, password_hash, role, permissions, email_verified_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        )
        .bind(&new.username)
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .bind(encode_permissions(&new.permissions)?)
        .bind(verified_at)
        .bind(&now)
        .execute(&self.db)
        .await
        .map_err(conflict_on_unique)?;

        let id = result.last_insert_rowid();
        tracing::debug!(account_id = id, username = %new.username, role = new.role.as_str(), "Account created");

        self.require(id).await
    }

    /// Apply name/email changes; a changed email clears verification
    pub async fn update_profile(
        &self,
        id: i64,
        changes: ProfileChanges,
    ) -> IdentityResult<Account> {
        let current = self.require(id).await?;
        let now = to_db_timestamp(self.clock.now());

        let email_changed = match (&changes.email, &current.email) {
            (Some(new), Some(old)) => !new.eq_ignore_ascii_case(old),
            (Some(_), None) => true,
            (None, _) => false,
        };

        sqlx::query(
            "UPDATE accounts
             SET name = COALESCE(?1, name),
                 email = COALESCE(?2, email),
                 email_verified_at = CASE WHEN ?3 THEN NULL ELSE email_verified_at END,
                 updated_at = ?4
             WHERE id = ?5",
        )
        .bind(&changes.name)
        .bind(&changes.email)
        .bind(email_changed)
        .bind(&now)
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(conflict_on_unique)?;

        if email_changed {
            tracing::info!(account_id = id, "Email changed, verification cleared");
        }

        self.require(id).await
    }

    pub async fn set_password(&self, id: i64, password_hash: &str) -> IdentityResult<()> {
        let mut conn = self.db.acquire().await?;
        self.set_password_in(&mut conn, id, password_hash).await
    }

    pub async fn set_password_in(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        password_hash: &str,
    ) -> IdentityResult<()> {
        sqlx::query("UPDATE accounts SET password_hash = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(password_hash)
            .bind(to_db_timestamp(self.clock.now()))
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Persist role and capability set together
    pub async fn set_role_and_permissions(
        &self,
        id: i64,
        role: Role,
        permissions: &BTreeSet<String>,
    ) -> IdentityResult<Account> {
        sqlx::query("UPDATE accounts SET role = ?1, permissions = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(role.as_str())
            .bind(encode_permissions(permissions)?)
            .bind(to_db_timestamp(self.clock.now()))
            .bind(id)
            .execute(&self.db)
            .await?;

        self.require(id).await
    }

    /// Stamp `email_verified_at`; returns false if it was already set
    pub async fn mark_verified(&self, id: i64) -> IdentityResult<bool> {
        let now = to_db_timestamp(self.clock.now());
        let result = sqlx::query(
            "UPDATE accounts SET email_verified_at = ?1, updated_at = ?1
             WHERE id = ?2 AND email_verified_at IS NULL",
        )
        .bind(&now)
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_last_login(&self, id: i64) -> IdentityResult<()> {
        sqlx::query("UPDATE accounts SET last_login_at = ?1 WHERE id = ?2")
            .bind(to_db_timestamp(self.clock.now()))
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Count accounts, optionally including suspended ones
    pub async fn count(&self, include_suspended: bool) -> IdentityResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM accounts WHERE ?1 OR deleted_at IS NULL",
        )
        .bind(include_suspended)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::db::connect_in_memory;

    async fn setup_store() -> AccountStore {
        let pool = connect_in_memory().await.unwrap();
        AccountStore::new(pool, Arc::new(FixedClock::default()))
    }

    fn new_account(username: &str, email: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            name: username.to_string(),
            email: Some(email.to_string()),
            password_hash: "hash".to_string(),
            role: Role::User,
            permissions: BTreeSet::new(),
            email_verified: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = setup_store().await;
        let account = store.create(new_account("bob", "bob@example.com")).await.unwrap();

        assert_eq!(account.username, "bob");
        assert_eq!(account.role, Role::User);
        assert!(account.email_verified_at.is_none());
        assert!(account.deleted_at.is_none());

        let by_name = store.find_by_username("BOB").await.unwrap().unwrap();
        assert_eq!(by_name.id, account.id);

        let by_login = store.find_by_login("Bob@Example.com").await.unwrap().unwrap();
        assert_eq!(by_login.id, account.id);
        assert!(store.get_active(account.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_username_and_email_conflict() {
        let store = setup_store().await;
        store.create(new_account("bob", "bob@example.com")).await.unwrap();

        let err = store
            .create(new_account("bob", "other@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Conflict(msg) if msg.contains("Username")));

        let err = store
            .create(new_account("robert", "bob@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Conflict(msg) if msg.contains("Email")));
    }

    #[tokio::test]
    async fn test_email_change_clears_verification() {
        let store = setup_store().await;
        let mut new = new_account("carol", "carol@example.com");
        new.email_verified = true;
        let account = store.create(new).await.unwrap();
        assert!(account.email_verified_at.is_some());

        // Same address in another case is not a change
        let account = store
            .update_profile(
                account.id,
                ProfileChanges {
                    name: Some("Carol C".to_string()),
                    email: Some("CAROL@example.com".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(account.name, "Carol C");
        assert!(account.email_verified_at.is_some());

        let account = store
            .update_profile(
                account.id,
                ProfileChanges {
                    name: None,
                    email: Some("carol@new.example.com".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(account.email.as_deref(), Some("carol@new.example.com"));
        assert!(account.email_verified_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_verified_once() {
        let store = setup_store().await;
        let account = store.create(new_account("dave", "dave@example.com")).await.unwrap();

        assert!(store.mark_verified(account.id).await.unwrap());
        assert!(!store.mark_verified(account.id).await.unwrap());
        assert!(store.require(account.id).await.unwrap().is_email_verified());
    }

    #[tokio::test]
    async fn test_email_taken_excludes_self() {
        let store = setup_store().await;
        let account = store.create(new_account("erin", "erin@example.com")).await.unwrap();

        assert!(store.email_taken("erin@example.com", None).await.unwrap());
        assert!(!store
            .email_taken("erin@example.com", Some(account.id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_role_and_permissions_persist() {
        let store = setup_store().await;
        let account = store.create(new_account("frank", "frank@example.com")).await.unwrap();

        let permissions = BTreeSet::from(["manage_users".to_string()]);
        let updated = store
            .set_role_and_permissions(account.id, Role::Admin, &permissions)
            .await
            .unwrap();

        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.permissions, permissions);
    }
}
