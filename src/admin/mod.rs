/// Admin and Authorization System
///
/// Role ordering, capability checks and the admin-facing account
/// management built on them.

pub mod audit;
pub mod roles;
pub mod users;

pub use audit::{AuditAction, AuditLog};
pub use roles::Role;
pub use users::{
    AdminManager, BulkAction, BulkOutcome, BulkRequest, BulkResult, CreateAccountRequest,
    PermissionsRequest, UpdateUserRequest,
};
