/// Role and capability authorization
///
/// Pure decisions over already-loaded accounts. Nothing here touches the
/// database, so every rule can be exercised without a pool.
use crate::{
    account::lifecycle::is_authenticable,
    db::account::Account,
    error::{FieldError, IdentityError, IdentityResult, SelfOperationKind},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Account role levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular account, no administrative capabilities
    User,
    /// Holds an explicit capability set
    Admin,
    /// Implicitly holds every capability
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn from_str(s: &str) -> IdentityResult<Self> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            _ => Err(IdentityError::field("role", format!("Invalid role: {}", s))),
        }
    }

    /// Check if this role can perform actions requiring another role
    pub fn can_act_as(&self, required: Role) -> bool {
        self >= &required
    }

    pub fn is_admin(&self) -> bool {
        self.can_act_as(Role::Admin)
    }
}

/// Capability names
pub mod capability {
    pub const VIEW_DASHBOARD: &str = "view_dashboard";
    pub const MANAGE_USERS: &str = "manage_users";
    pub const MANAGE_ADMINS: &str = "manage_admins";
    pub const VIEW_STATISTICS: &str = "view_statistics";
    pub const VIEW_AUDIT_LOGS: &str = "view_audit_logs";
}

/// Every capability an admin can hold
pub const CAPABILITIES: &[&str] = &[
    capability::VIEW_DASHBOARD,
    capability::MANAGE_USERS,
    capability::MANAGE_ADMINS,
    capability::VIEW_STATISTICS,
    capability::VIEW_AUDIT_LOGS,
];

/// Granted when a filtered request would otherwise leave an admin with nothing
pub const BASELINE_CAPABILITY: &str = capability::VIEW_DASHBOARD;

/// Capabilities an account actually holds
pub fn effective_permissions(account: &Account) -> BTreeSet<String> {
    match account.role {
        Role::SuperAdmin => CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        Role::Admin => account.permissions.clone(),
        Role::User => BTreeSet::new(),
    }
}

pub fn has_permission(account: &Account, capability: &str) -> bool {
    match account.role {
        Role::SuperAdmin => true,
        Role::Admin => account.permissions.contains(capability),
        Role::User => false,
    }
}

/// Require at least `minimum`
pub fn require_role(account: &Account, minimum: Role) -> IdentityResult<()> {
    if !is_authenticable(account) {
        return Err(IdentityError::Unauthenticated);
    }

    if !account.role.can_act_as(minimum) {
        tracing::warn!(
            account_id = account.id,
            role = account.role.as_str(),
            required = minimum.as_str(),
            "Role check failed"
        );
        return Err(IdentityError::Forbidden);
    }

    Ok(())
}

/// Require a named capability
pub fn require_permission(account: &Account, capability: &str) -> IdentityResult<()> {
    if !is_authenticable(account) {
        return Err(IdentityError::Unauthenticated);
    }

    if !has_permission(account, capability) {
        tracing::warn!(
            account_id = account.id,
            capability,
            "Permission check failed"
        );
        return Err(IdentityError::InsufficientPrivileges(capability.to_string()));
    }

    Ok(())
}

/// Operations an account may attempt against an account id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfOperation {
    Suspend,
    Delete,
    RoleChange { current: Role, requested: Role },
}

/// Refuse operations that would lock the acting account out of itself
///
/// Only applies when acting and target ids are equal; anything aimed at
/// another account is left to the role and permission checks.
pub fn guard_self_operation(
    acting_id: i64,
    target_id: i64,
    operation: SelfOperation,
) -> IdentityResult<()> {
    if acting_id != target_id {
        return Ok(());
    }

    let denied = match operation {
        SelfOperation::Suspend => Some(SelfOperationKind::Suspend),
        SelfOperation::Delete => Some(SelfOperationKind::Delete),
        SelfOperation::RoleChange { current, requested } if requested < current => {
            Some(SelfOperationKind::RoleDowngrade)
        }
        SelfOperation::RoleChange { .. } => None,
    };

    match denied {
        Some(kind) => {
            tracing::warn!(account_id = acting_id, operation = kind.as_str(), "Self operation denied");
            Err(IdentityError::SelfOperationForbidden(kind))
        }
        None => Ok(()),
    }
}

/// Narrow a requested capability set to what the grantor may hand out
///
/// The result is always a subset of `grantor`. An empty intersection falls
/// back to the baseline capability when the grantor holds it.
pub fn filter_grantable_permissions(
    requested: &BTreeSet<String>,
    grantor: &BTreeSet<String>,
) -> BTreeSet<String> {
    let granted: BTreeSet<String> = requested.intersection(grantor).cloned().collect();

    if granted.is_empty() && grantor.contains(BASELINE_CAPABILITY) {
        return BTreeSet::from([BASELINE_CAPABILITY.to_string()]);
    }

    granted
}

/// Parse capability names from a request, rejecting unknown ones
pub fn parse_capabilities<S: AsRef<str>>(values: &[S]) -> IdentityResult<BTreeSet<String>> {
    let mut errors = Vec::new();
    let mut parsed = BTreeSet::new();

    for value in values {
        let value = value.as_ref().trim();
        if CAPABILITIES.contains(&value) {
            parsed.insert(value.to_string());
        } else {
            errors.push(FieldError::new(
                "permissions",
                format!("Unknown permission: {}", value),
            ));
        }
    }

    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(IdentityError::Validation(errors))
    }
}
