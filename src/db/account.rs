/// Account database models and row mapping
use crate::{
    admin::roles::Role,
    error::{IdentityError, IdentityResult},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};
use std::collections::BTreeSet;

/// Columns selected whenever a full account row is loaded
pub const ACCOUNT_COLUMNS: &str = "id, username, name, email, password_hash, role, permissions, \
     email_verified_at, last_login_at, deleted_at, created_at, updated_at";

/// Render a timestamp the way every table stores it
///
/// Fixed-width UTC so that SQL string comparison orders instants correctly.
pub fn to_db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp
pub fn parse_db_timestamp(value: &str) -> IdentityResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IdentityError::Internal(format!("Invalid timestamp: {}", e)))
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> IdentityResult<Option<DateTime<Utc>>> {
    row.try_get::<Option<String>, _>(column)?
        .as_deref()
        .map(parse_db_timestamp)
        .transpose()
}

/// Account record in the database
///
/// `deleted_at` set means suspended; a purged account has no row at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub permissions: BTreeSet<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn from_row(row: &SqliteRow) -> IdentityResult<Self> {
        let role: String = row.try_get("role")?;
        let permissions: String = row.try_get("permissions")?;
        let permissions: BTreeSet<String> = serde_json::from_str(&permissions)
            .map_err(|e| IdentityError::Internal(format!("Invalid permissions column: {}", e)))?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Account {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            role: Role::from_str(&role)?,
            permissions,
            email_verified_at: optional_timestamp(row, "email_verified_at")?,
            last_login_at: optional_timestamp(row, "last_login_at")?,
            deleted_at: optional_timestamp(row, "deleted_at")?,
            created_at: parse_db_timestamp(&created_at)?,
            updated_at: parse_db_timestamp(&updated_at)?,
        })
    }

    pub fn is_email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

/// Encode a permission set for the `permissions` column
pub fn encode_permissions(permissions: &BTreeSet<String>) -> IdentityResult<String> {
    serde_json::to_string(permissions)
        .map_err(|e| IdentityError::Internal(format!("Failed to encode permissions: {}", e)))
}

/// Bearer session token record; the secret itself is never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn from_row(row: &SqliteRow) -> IdentityResult<Self> {
        let created_at: String = row.try_get("created_at")?;

        Ok(AccessToken {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            name: row.try_get("name")?,
            token_hash: row.try_get("token_hash")?,
            last_used_at: optional_timestamp(row, "last_used_at")?,
            expires_at: optional_timestamp(row, "expires_at")?,
            created_at: parse_db_timestamp(&created_at)?,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

/// Pending password reset, one per email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordResetRecord {
    pub email: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetRecord {
    pub fn from_row(row: &SqliteRow) -> IdentityResult<Self> {
        let created_at: String = row.try_get("created_at")?;

        Ok(PasswordResetRecord {
            email: row.try_get("email")?,
            token_hash: row.try_get("token_hash")?,
            created_at: parse_db_timestamp(&created_at)?,
        })
    }
}
