/// Account lifecycle state machine
///
/// ```text
/// Active --suspend--> Suspended --restore--> Active
///    |                    |
///    +------purge---------+--purge--> PermanentlyDeleted (row removed)
/// ```
///
/// State changes and the token revocations they imply commit in the same
/// transaction.
use crate::{
    account::{password_reset::PasswordResetTokenStore, store::AccountStore, tokens::TokenStore},
    admin::roles::{guard_self_operation, SelfOperation},
    clock::Clock,
    db::account::{to_db_timestamp, Account},
    error::{IdentityError, IdentityResult},
    metrics,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Whether an account may authenticate at all
///
/// The single place this decision is made; every login and token check
/// goes through it.
pub fn is_authenticable(account: &Account) -> bool {
    account.deleted_at.is_none()
}

/// Reportable lifecycle state of an existing row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Active,
    Suspended,
}

impl AccountState {
    pub fn of(account: &Account) -> Self {
        if is_authenticable(account) {
            AccountState::Active
        } else {
            AccountState::Suspended
        }
    }
}

/// Lifecycle manager
#[derive(Clone)]
pub struct AccountLifecycleManager {
    db: SqlitePool,
    accounts: AccountStore,
    tokens: TokenStore,
    resets: PasswordResetTokenStore,
    clock: Arc<dyn Clock>,
}

impl AccountLifecycleManager {
    pub fn new(
        db: SqlitePool,
        accounts: AccountStore,
        tokens: TokenStore,
        resets: PasswordResetTokenStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            accounts,
            tokens,
            resets,
            clock,
        }
    }

    /// Suspend an account and revoke all of its tokens
    pub async fn suspend(&self, account_id: i64, acting_id: i64) -> IdentityResult<Account> {
        guard_self_operation(acting_id, account_id, SelfOperation::Suspend)?;

        let mut tx = self.db.begin().await?;

        let account = self
            .accounts
            .get_in(&mut tx, account_id)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("Account {} not found", account_id)))?;

        if !is_authenticable(&account) {
            return Err(IdentityError::AlreadySuspended);
        }

        let now = to_db_timestamp(self.clock.now());
        sqlx::query("UPDATE accounts SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2")
            .bind(&now)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        let revoked = self.tokens.revoke_all_in(&mut tx, account_id).await?;
        let account = self
            .accounts
            .get_in(&mut tx, account_id)
            .await?
            .ok_or_else(|| IdentityError::Internal("Suspended account vanished".to_string()))?;

        tx.commit().await?;

        metrics::record_lifecycle_transition("suspend");
        tracing::info!(account_id, acting_id, revoked, "Account suspended");

        Ok(account)
    }

    /// Clear the suspension; revoked tokens stay revoked
    pub async fn restore(&self, account_id: i64) -> IdentityResult<Account> {
        let mut tx = self.db.begin().await?;

        let account = self
            .accounts
            .get_in(&mut tx, account_id)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("Account {} not found", account_id)))?;

        if is_authenticable(&account) {
            return Err(IdentityError::NotSuspended);
        }

        let result = sqlx::query(
            "UPDATE accounts SET deleted_at = NULL, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NOT NULL",
        )
        .bind(to_db_timestamp(self.clock.now()))
        .bind(account_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::NotSuspended);
        }

        let account = self
            .accounts
            .get_in(&mut tx, account_id)
            .await?
            .ok_or_else(|| IdentityError::Internal("Restored account vanished".to_string()))?;

        tx.commit().await?;

        metrics::record_lifecycle_transition("restore");
        tracing::info!(account_id, "Account restored");

        Ok(account)
    }

    /// Permanently delete an account, its tokens and its pending resets
    pub async fn purge(&self, account_id: i64, acting_id: i64) -> IdentityResult<()> {
        guard_self_operation(acting_id, account_id, SelfOperation::Delete)?;

        let mut tx = self.db.begin().await?;

        let account = self
            .accounts
            .get_in(&mut tx, account_id)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("Account {} not found", account_id)))?;

        let revoked = self.tokens.revoke_all_in(&mut tx, account_id).await?;
        if let Some(email) = &account.email {
            self.resets.delete_in(&mut tx, email).await?;
        }

        sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        metrics::record_lifecycle_transition("purge");
        tracing::info!(account_id, acting_id, revoked, "Account permanently deleted");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::store::NewAccount;
    use crate::admin::roles::Role;
    use crate::clock::testing::FixedClock;
    use crate::crypto::testing::CountingRandom;
    use crate::db::connect_in_memory;
    use crate::error::SelfOperationKind;
    use chrono::Duration;
    use std::collections::BTreeSet;

    struct Fixture {
        accounts: AccountStore,
        tokens: TokenStore,
        resets: PasswordResetTokenStore,
        lifecycle: AccountLifecycleManager,
    }

    async fn setup() -> Fixture {
        let pool = connect_in_memory().await.unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::default());
        let random = Arc::new(CountingRandom::default());
        let accounts = AccountStore::new(pool.clone(), clock.clone());
        let tokens = TokenStore::new(pool.clone(), accounts.clone(), clock.clone(), random.clone());
        let resets = PasswordResetTokenStore::new(
            pool.clone(),
            accounts.clone(),
            clock.clone(),
            random,
            Duration::minutes(60),
        );
        let lifecycle = AccountLifecycleManager::new(
            pool,
            accounts.clone(),
            tokens.clone(),
            resets.clone(),
            clock,
        );
        Fixture {
            accounts,
            tokens,
            resets,
            lifecycle,
        }
    }

    async fn create_account(accounts: &AccountStore, username: &str) -> Account {
        accounts
            .create(NewAccount {
                username: username.to_string(),
                name: username.to_string(),
                email: Some(format!("{}@example.com", username)),
                password_hash: "hash".to_string(),
                role: Role::User,
                permissions: BTreeSet::new(),
                email_verified: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_suspend_revokes_tokens() {
        let f = setup().await;
        let admin = create_account(&f.accounts, "admin").await;
        let target = create_account(&f.accounts, "target").await;
        let token = f.tokens.issue(target.id, "login", None).await.unwrap();

        let suspended = f.lifecycle.suspend(target.id, admin.id).await.unwrap();
        assert!(suspended.deleted_at.is_some());
        assert_eq!(AccountState::of(&suspended), AccountState::Suspended);
        assert!(!is_authenticable(&suspended));

        assert!(f.tokens.validate(&token.plaintext).await.is_err());
        assert!(f.tokens.list_for_account(target.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_suspend_guards() {
        let f = setup().await;
        let admin = create_account(&f.accounts, "admin").await;
        let target = create_account(&f.accounts, "target").await;

        assert!(matches!(
            f.lifecycle.suspend(admin.id, admin.id).await,
            Err(IdentityError::SelfOperationForbidden(SelfOperationKind::Suspend))
        ));
        assert!(matches!(
            f.lifecycle.suspend(9999, admin.id).await,
            Err(IdentityError::NotFound(_))
        ));

        f.lifecycle.suspend(target.id, admin.id).await.unwrap();
        assert!(matches!(
            f.lifecycle.suspend(target.id, admin.id).await,
            Err(IdentityError::AlreadySuspended)
        ));
    }

    #[tokio::test]
    async fn test_restore_keeps_tokens_revoked() {
        let f = setup().await;
        let admin = create_account(&f.accounts, "admin").await;
        let target = create_account(&f.accounts, "target").await;
        let token = f.tokens.issue(target.id, "login", None).await.unwrap();

        assert!(matches!(
            f.lifecycle.restore(target.id).await,
            Err(IdentityError::NotSuspended)
        ));

        f.lifecycle.suspend(target.id, admin.id).await.unwrap();
        let restored = f.lifecycle.restore(target.id).await.unwrap();
        assert_eq!(AccountState::of(&restored), AccountState::Active);

        assert!(f.tokens.validate(&token.plaintext).await.is_err());
        let fresh = f.tokens.issue(target.id, "login", None).await.unwrap();
        assert!(f.tokens.validate(&fresh.plaintext).await.is_ok());
    }

    #[tokio::test]
    async fn test_restore_after_purge_is_not_found() {
        let f = setup().await;
        let admin = create_account(&f.accounts, "admin").await;
        let target = create_account(&f.accounts, "target").await;

        f.lifecycle.suspend(target.id, admin.id).await.unwrap();
        f.lifecycle.purge(target.id, admin.id).await.unwrap();

        assert!(matches!(
            f.lifecycle.restore(target.id).await,
            Err(IdentityError::NotFound(_))
        ));
        assert!(f.accounts.get(target.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_removes_everything() {
        let f = setup().await;
        let admin = create_account(&f.accounts, "admin").await;
        let target = create_account(&f.accounts, "target").await;
        let token = f.tokens.issue(target.id, "login", None).await.unwrap();
        let reset = f.resets.create("target@example.com").await.unwrap();

        assert!(matches!(
            f.lifecycle.purge(admin.id, admin.id).await,
            Err(IdentityError::SelfOperationForbidden(SelfOperationKind::Delete))
        ));

        f.lifecycle.purge(target.id, admin.id).await.unwrap();

        assert!(f.accounts.get(target.id).await.unwrap().is_none());
        assert!(f.tokens.validate(&token.plaintext).await.is_err());
        assert!(matches!(
            f.resets.verify_and_consume("target@example.com", &reset).await,
            Err(IdentityError::InvalidOrExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_purge_suspended_account() {
        let f = setup().await;
        let admin = create_account(&f.accounts, "admin").await;
        let target = create_account(&f.accounts, "target").await;

        f.lifecycle.suspend(target.id, admin.id).await.unwrap();
        f.lifecycle.purge(target.id, admin.id).await.unwrap();
        assert!(f.accounts.get(target.id).await.unwrap().is_none());
    }
}
