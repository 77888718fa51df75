/// Admin action audit log
///
/// Append-only. Rows are written after an admin change succeeds and are
/// never read back by the service itself.
use crate::{
    clock::Clock,
    db::account::to_db_timestamp,
    error::IdentityResult,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CreateAccount,
    UpdateAccount,
    GrantPermissions,
    RevokePermissions,
    Suspend,
    Restore,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateAccount => "create_account",
            AuditAction::UpdateAccount => "update_account",
            AuditAction::GrantPermissions => "grant_permissions",
            AuditAction::RevokePermissions => "revoke_permissions",
            AuditAction::Suspend => "suspend",
            AuditAction::Restore => "restore",
            AuditAction::Delete => "delete",
        }
    }
}

#[derive(Clone)]
pub struct AuditLog {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn record(
        &self,
        admin_id: i64,
        action: AuditAction,
        subject_id: Option<i64>,
        details: Option<String>,
    ) -> IdentityResult<()> {
        sqlx::query(
            "INSERT INTO admin_audit_log (admin_id, action, subject_id, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(admin_id)
        .bind(action.as_str())
        .bind(subject_id)
        .bind(&details)
        .bind(to_db_timestamp(self.clock.now()))
        .execute(&self.db)
        .await?;

        tracing::info!(
            admin_id,
            action = action.as_str(),
            subject_id,
            "Admin action recorded"
        );
        Ok(())
    }
}
