//! Aurora Gate - identity and access-control server
//!
//! Accounts, opaque bearer sessions, signed email verification links,
//! password resets and role-gated administration over SQLite.

pub mod account;
pub mod admin;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mailer;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod validation;

pub use context::AppContext;
pub use error::{IdentityError, IdentityResult};
