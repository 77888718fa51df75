/// Authentication extractors
use crate::{
    account::ValidatedToken,
    admin::{roles::require_role, Role},
    api::middleware::{extract_bearer_token, BearerHeader},
    context::AppContext,
    db::account::Account,
    error::IdentityError,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated context - resolves the bearer token to its account
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: Account,
    pub token_id: i64,
}

impl From<ValidatedToken> for AuthContext {
    fn from(validated: ValidatedToken) -> Self {
        AuthContext {
            account: validated.account,
            token_id: validated.token_id,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = IdentityError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = match extract_bearer_token(&parts.headers) {
            BearerHeader::Token(token) => token,
            BearerHeader::Missing => return Err(IdentityError::Unauthenticated),
            BearerHeader::Malformed => return Err(IdentityError::InvalidToken),
        };

        let validated = state.tokens.validate(&token).await?;
        Ok(AuthContext::from(validated))
    }
}

/// Admin authentication context - requires at least the admin role
///
/// Capability checks stay with the individual operations.
#[derive(Debug, Clone)]
pub struct AdminAuthContext {
    pub account: Account,
    pub token_id: i64,
    pub role: Role,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuthContext {
    type Rejection = IdentityError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_request_parts(parts, state).await?;

        require_role(&auth.account, Role::Admin)?;
        tracing::debug!(
            account_id = auth.account.id,
            role = auth.account.role.as_str(),
            "Admin request authenticated"
        );

        Ok(AdminAuthContext {
            role: auth.account.role,
            account: auth.account,
            token_id: auth.token_id,
        })
    }
}
