/// Admin user management
///
/// Every operation takes the acting account first, checks its role and
/// capabilities through the guard functions in [`super::roles`], and writes
/// an audit row once the change has been applied.
use super::{
    audit::{AuditAction, AuditLog},
    roles::{
        capability, effective_permissions, filter_grantable_permissions, guard_self_operation,
        parse_capabilities, require_permission, require_role, Role, SelfOperation,
    },
};
use crate::{
    account::{
        lifecycle::AccountLifecycleManager,
        store::{AccountStore, NewAccount, ProfileChanges},
        tokens::TokenStore,
    },
    crypto::password::{hash_blocking, PasswordHasher},
    db::account::Account,
    error::{IdentityError, IdentityResult},
    metrics,
    validation::{
        email_rules, name_rules, normalize_email, optional, password_rules, username_rules,
        Validator,
    },
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Maximum ids accepted by one bulk request
pub const MAX_BULK_IDS: usize = 100;

/// Admin request to create an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreateAccountCommand {
    pub username: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub permissions: BTreeSet<String>,
}

impl CreateAccountRequest {
    pub fn into_command(self) -> IdentityResult<CreateAccountCommand> {
        let mut validator = Validator::new();
        validator
            .field("username", self.username.as_deref(), &username_rules())
            .field("email", self.email.as_deref(), &email_rules())
            .field("password", self.password.as_deref(), &password_rules())
            .field("name", self.name.as_deref(), &optional(name_rules()));

        let role = match self.role.as_deref().map(str::trim) {
            None | Some("") => Role::User,
            Some(value) => match Role::from_str(value) {
                Ok(role) => role,
                Err(_) => {
                    validator.error("role", format!("Unknown role: {}", value));
                    Role::User
                }
            },
        };

        let permissions = match parse_capabilities(&self.permissions) {
            Ok(permissions) => permissions,
            Err(IdentityError::Validation(errors)) => {
                for e in errors {
                    validator.error(&e.field, e.message);
                }
                BTreeSet::new()
            }
            Err(e) => return Err(e),
        };
        validator.finish()?;

        let username = self.username.unwrap_or_default().trim().to_string();
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| username.clone());

        Ok(CreateAccountCommand {
            name,
            username,
            email: normalize_email(&self.email.unwrap_or_default()),
            password: self.password.unwrap_or_default(),
            role,
            permissions,
        })
    }
}

/// Admin request to change another account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateUserCommand {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

impl UpdateUserRequest {
    pub fn into_command(self) -> IdentityResult<UpdateUserCommand> {
        let mut validator = Validator::new();
        validator
            .field("name", self.name.as_deref(), &optional(name_rules()))
            .field("email", self.email.as_deref(), &optional(email_rules()))
            .field("password", self.password.as_deref(), &optional(password_rules()));

        let role = match self.role.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => match Role::from_str(value) {
                Ok(role) => Some(role),
                Err(_) => {
                    validator.error("role", format!("Unknown role: {}", value));
                    None
                }
            },
        };
        validator.finish()?;

        Ok(UpdateUserCommand {
            name: self
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            email: self
                .email
                .map(|e| normalize_email(&e))
                .filter(|e| !e.is_empty()),
            password: self.password.filter(|p| !p.is_empty()),
            role,
        })
    }
}

/// Capability names to grant or revoke
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsRequest {
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl PermissionsRequest {
    pub fn into_capabilities(self) -> IdentityResult<BTreeSet<String>> {
        if self.permissions.is_empty() {
            return Err(IdentityError::field(
                "permissions",
                "At least one permission is required",
            ));
        }
        parse_capabilities(&self.permissions)
    }
}

/// Operations supported by bulk requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Suspend,
    Restore,
    Delete,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Suspend => "suspend",
            BulkAction::Restore => "restore",
            BulkAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequest {
    pub action: BulkAction,
    #[serde(default)]
    pub ids: Vec<i64>,
}

impl BulkRequest {
    /// Validate the id list and drop repeats, keeping first occurrences
    pub fn into_parts(self) -> IdentityResult<(BulkAction, Vec<i64>)> {
        let mut validator = Validator::new();
        if self.ids.is_empty() {
            validator.error("ids", "At least one id is required");
        } else if self.ids.len() > MAX_BULK_IDS {
            validator.error("ids", format!("At most {} ids per request", MAX_BULK_IDS));
        }
        validator.finish()?;

        Ok((self.action, dedup_preserving_order(&self.ids)))
    }
}

fn dedup_preserving_order(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Per-id outcome of a bulk operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResult {
    pub id: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub action: BulkAction,
    pub results: Vec<BulkResult>,
    pub successful_count: usize,
    pub failed_count: usize,
}

/// Admin user manager
#[derive(Clone)]
pub struct AdminManager {
    accounts: AccountStore,
    tokens: TokenStore,
    lifecycle: AccountLifecycleManager,
    hasher: Arc<dyn PasswordHasher>,
    audit: AuditLog,
}

impl AdminManager {
    pub fn new(
        accounts: AccountStore,
        tokens: TokenStore,
        lifecycle: AccountLifecycleManager,
        hasher: Arc<dyn PasswordHasher>,
        audit: AuditLog,
    ) -> Self {
        Self {
            accounts,
            tokens,
            lifecycle,
            hasher,
            audit,
        }
    }

    /// Capability needed to manage an account of `role`
    fn capability_for(role: Role) -> &'static str {
        if role.is_admin() {
            capability::MANAGE_ADMINS
        } else {
            capability::MANAGE_USERS
        }
    }

    /// Create an account of any role the actor may create
    pub async fn create_account(
        &self,
        acting: &Account,
        cmd: CreateAccountCommand,
    ) -> IdentityResult<Account> {
        require_role(acting, Role::Admin)?;
        require_permission(acting, Self::capability_for(cmd.role))?;
        if cmd.role == Role::SuperAdmin && acting.role != Role::SuperAdmin {
            return Err(IdentityError::Forbidden);
        }

        if self.accounts.username_exists(&cmd.username).await? {
            return Err(IdentityError::Conflict("Username already taken".to_string()));
        }
        if self.accounts.email_taken(&cmd.email, None).await? {
            return Err(IdentityError::Conflict("Email already registered".to_string()));
        }

        let permissions = match cmd.role {
            Role::Admin => {
                filter_grantable_permissions(&cmd.permissions, &effective_permissions(acting))
            }
            Role::User | Role::SuperAdmin => BTreeSet::new(),
        };

        let password_hash = hash_blocking(self.hasher.clone(), cmd.password).await?;
        let account = self
            .accounts
            .create(NewAccount {
                username: cmd.username,
                name: cmd.name,
                email: Some(cmd.email),
                password_hash,
                role: cmd.role,
                permissions,
                email_verified: true,
            })
            .await?;

        metrics::record_account_creation(account.role.as_str());
        self.audit
            .record(
                acting.id,
                AuditAction::CreateAccount,
                Some(account.id),
                Some(format!("role={}", account.role.as_str())),
            )
            .await?;

        Ok(account)
    }

    pub async fn get_user(&self, acting: &Account, target_id: i64) -> IdentityResult<Account> {
        require_role(acting, Role::Admin)?;
        require_permission(acting, capability::MANAGE_USERS)?;
        self.accounts.require(target_id).await
    }

    /// Change another account's profile, password or role
    pub async fn update_user(
        &self,
        acting: &Account,
        target_id: i64,
        cmd: UpdateUserCommand,
    ) -> IdentityResult<Account> {
        require_role(acting, Role::Admin)?;
        let target = self.accounts.require(target_id).await?;

        if let Some(requested) = cmd.role {
            guard_self_operation(
                acting.id,
                target.id,
                SelfOperation::RoleChange {
                    current: target.role,
                    requested,
                },
            )?;
            if requested > acting.role {
                return Err(IdentityError::Forbidden);
            }
        }

        if acting.id != target.id {
            if target.role > acting.role {
                return Err(IdentityError::Forbidden);
            }
            let touched_role = cmd.role.map_or(target.role, |r| r.max(target.role));
            require_permission(acting, Self::capability_for(touched_role))?;
        }

        if let Some(email) = &cmd.email {
            if self.accounts.email_taken(email, Some(target.id)).await? {
                return Err(IdentityError::Conflict("Email already registered".to_string()));
            }
        }

        let mut changed = Vec::new();

        if cmd.name.is_some() || cmd.email.is_some() {
            if cmd.name.is_some() {
                changed.push("name");
            }
            if cmd.email.is_some() {
                changed.push("email");
            }
            self.accounts
                .update_profile(
                    target.id,
                    ProfileChanges {
                        name: cmd.name,
                        email: cmd.email,
                    },
                )
                .await?;
        }

        if let Some(password) = cmd.password {
            let password_hash = hash_blocking(self.hasher.clone(), password).await?;
            self.accounts.set_password(target.id, &password_hash).await?;
            if acting.id != target.id {
                self.tokens.revoke_all(target.id).await?;
            }
            changed.push("password");
        }

        if let Some(role) = cmd.role.filter(|r| *r != target.role) {
            // Capabilities only mean something on the admin role
            let permissions = if role == Role::Admin {
                target.permissions.clone()
            } else {
                BTreeSet::new()
            };
            self.accounts
                .set_role_and_permissions(target.id, role, &permissions)
                .await?;
            changed.push("role");
        }

        let updated = self.accounts.require(target.id).await?;
        if !changed.is_empty() {
            self.audit
                .record(
                    acting.id,
                    AuditAction::UpdateAccount,
                    Some(target.id),
                    Some(changed.join(",")),
                )
                .await?;
        }

        Ok(updated)
    }

    /// Add capabilities to an admin, limited to what the actor holds
    pub async fn grant_permissions(
        &self,
        acting: &Account,
        target_id: i64,
        requested: BTreeSet<String>,
    ) -> IdentityResult<Account> {
        let target = self.permission_target(acting, target_id).await?;

        let grantable = filter_grantable_permissions(&requested, &effective_permissions(acting));
        let mut permissions = target.permissions.clone();
        permissions.extend(grantable.iter().cloned());

        let updated = self
            .accounts
            .set_role_and_permissions(target.id, target.role, &permissions)
            .await?;

        self.audit
            .record(
                acting.id,
                AuditAction::GrantPermissions,
                Some(target.id),
                Some(grantable.into_iter().collect::<Vec<_>>().join(",")),
            )
            .await?;

        Ok(updated)
    }

    pub async fn revoke_permissions(
        &self,
        acting: &Account,
        target_id: i64,
        revoked: BTreeSet<String>,
    ) -> IdentityResult<Account> {
        let target = self.permission_target(acting, target_id).await?;

        let permissions: BTreeSet<String> =
            target.permissions.difference(&revoked).cloned().collect();
        let updated = self
            .accounts
            .set_role_and_permissions(target.id, target.role, &permissions)
            .await?;

        self.audit
            .record(
                acting.id,
                AuditAction::RevokePermissions,
                Some(target.id),
                Some(revoked.into_iter().collect::<Vec<_>>().join(",")),
            )
            .await?;

        Ok(updated)
    }

    async fn permission_target(&self, acting: &Account, target_id: i64) -> IdentityResult<Account> {
        require_role(acting, Role::Admin)?;
        require_permission(acting, capability::MANAGE_ADMINS)?;

        let target = self.accounts.require(target_id).await?;
        if target.role != Role::Admin {
            return Err(IdentityError::field(
                "permissions",
                "Permissions can only be assigned to admin accounts",
            ));
        }
        Ok(target)
    }

    pub async fn suspend(&self, acting: &Account, target_id: i64) -> IdentityResult<Account> {
        self.require_manage(acting, target_id).await?;
        let account = self.lifecycle.suspend(target_id, acting.id).await?;
        self.audit
            .record(acting.id, AuditAction::Suspend, Some(target_id), None)
            .await?;
        Ok(account)
    }

    pub async fn restore(&self, acting: &Account, target_id: i64) -> IdentityResult<Account> {
        self.require_manage(acting, target_id).await?;
        let account = self.lifecycle.restore(target_id).await?;
        self.audit
            .record(acting.id, AuditAction::Restore, Some(target_id), None)
            .await?;
        Ok(account)
    }

    pub async fn delete(&self, acting: &Account, target_id: i64) -> IdentityResult<()> {
        self.require_manage(acting, target_id).await?;
        self.lifecycle.purge(target_id, acting.id).await?;
        self.audit
            .record(acting.id, AuditAction::Delete, Some(target_id), None)
            .await?;
        Ok(())
    }

    /// Lifecycle changes need `manage_users`; admin targets also need `manage_admins`
    async fn require_manage(&self, acting: &Account, target_id: i64) -> IdentityResult<()> {
        require_role(acting, Role::Admin)?;
        require_permission(acting, capability::MANAGE_USERS)?;

        if let Some(target) = self.accounts.get(target_id).await? {
            if target.role > acting.role {
                return Err(IdentityError::Forbidden);
            }
            if target.role.is_admin() && target.id != acting.id {
                require_permission(acting, capability::MANAGE_ADMINS)?;
            }
        }
        Ok(())
    }

    /// Apply one lifecycle action to many accounts
    ///
    /// Each id is attempted independently; a failure never stops the rest.
    pub async fn bulk(
        &self,
        acting: &Account,
        action: BulkAction,
        ids: Vec<i64>,
    ) -> IdentityResult<BulkOutcome> {
        require_role(acting, Role::Admin)?;
        require_permission(acting, capability::MANAGE_USERS)?;

        let mut results = Vec::with_capacity(ids.len());
        for id in dedup_preserving_order(&ids) {
            let outcome = match action {
                BulkAction::Suspend => self.suspend(acting, id).await.map(|_| ()),
                BulkAction::Restore => self.restore(acting, id).await.map(|_| ()),
                BulkAction::Delete => self.delete(acting, id).await,
            };

            match outcome {
                Ok(()) => results.push(BulkResult {
                    id,
                    success: true,
                    error: None,
                    message: None,
                }),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::debug!(account_id = id, action = action.as_str(), "Bulk item failed: {}", e);
                    results.push(BulkResult {
                        id,
                        success: false,
                        error: Some(e.code().to_string()),
                        message: Some(e.client_message()),
                    });
                }
            }
        }

        let successful_count = results.iter().filter(|r| r.success).count();
        let failed_count = results.len() - successful_count;

        tracing::info!(
            admin_id = acting.id,
            action = action.as_str(),
            successful_count,
            failed_count,
            "Bulk operation finished"
        );

        Ok(BulkOutcome {
            action,
            results,
            successful_count,
            failed_count,
        })
    }
}
