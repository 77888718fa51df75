/// Endpoints for the authenticated account itself
use crate::{
    account::{AccountView, ChangePasswordRequest, MessageResponse, TokenView, UpdateProfileRequest},
    auth::AuthContext,
    context::AppContext,
    error::IdentityResult,
};
use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};

/// Build user routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/users/me", get(current_user).put(update_profile))
        .route("/users/me/tokens", get(list_tokens))
        .route("/users/change-password", put(change_password))
}

async fn current_user(auth: AuthContext) -> Json<AccountView> {
    Json(AccountView::from(&auth.account))
}

async fn update_profile(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<UpdateProfileRequest>,
) -> IdentityResult<Json<AccountView>> {
    let account = ctx
        .account_manager
        .update_profile(&auth.account, req.into_command()?)
        .await?;
    Ok(Json(AccountView::from(&account)))
}

async fn list_tokens(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> IdentityResult<Json<Vec<TokenView>>> {
    let tokens = ctx.account_manager.list_tokens(auth.account.id).await?;
    Ok(Json(
        tokens
            .iter()
            .map(|t| TokenView::new(t, auth.token_id))
            .collect(),
    ))
}

async fn change_password(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> IdentityResult<Json<MessageResponse>> {
    ctx.account_manager
        .change_password(&auth.account, auth.token_id, req.into_command()?)
        .await?;
    Ok(Json(MessageResponse::new(
        "Password changed; other sessions have been signed out",
    )))
}
