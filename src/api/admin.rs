/// Admin API Endpoints
///
/// The extractor only establishes that the caller is an admin; capability
/// and self-protection checks happen inside [`AdminManager`](crate::admin::AdminManager).
use crate::{
    account::{AccountView, MessageResponse},
    admin::{BulkOutcome, BulkRequest, CreateAccountRequest, PermissionsRequest, UpdateUserRequest},
    auth::AdminAuthContext,
    context::AppContext,
    error::IdentityResult,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/admin/users", post(create_user))
        .route("/admin/users/bulk", post(bulk))
        .route(
            "/admin/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/admin/users/:id/deactivate", post(suspend_user))
        .route("/admin/users/:id/activate", post(restore_user))
        .route(
            "/admin/users/:id/permissions",
            post(grant_permissions).delete(revoke_permissions),
        )
}

async fn create_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(req): Json<CreateAccountRequest>,
) -> IdentityResult<(StatusCode, Json<AccountView>)> {
    let account = ctx
        .admin_manager
        .create_account(&auth.account, req.into_command()?)
        .await?;
    Ok((StatusCode::CREATED, Json(AccountView::from(&account))))
}

async fn get_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
) -> IdentityResult<Json<AccountView>> {
    let account = ctx.admin_manager.get_user(&auth.account, id).await?;
    Ok(Json(AccountView::from(&account)))
}

async fn update_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> IdentityResult<Json<AccountView>> {
    let account = ctx
        .admin_manager
        .update_user(&auth.account, id, req.into_command()?)
        .await?;
    Ok(Json(AccountView::from(&account)))
}

async fn delete_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
) -> IdentityResult<Json<MessageResponse>> {
    ctx.admin_manager.delete(&auth.account, id).await?;
    Ok(Json(MessageResponse::new("Account deleted")))
}

async fn suspend_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
) -> IdentityResult<Json<AccountView>> {
    let account = ctx.admin_manager.suspend(&auth.account, id).await?;
    Ok(Json(AccountView::from(&account)))
}

async fn restore_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
) -> IdentityResult<Json<AccountView>> {
    let account = ctx.admin_manager.restore(&auth.account, id).await?;
    Ok(Json(AccountView::from(&account)))
}

async fn grant_permissions(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
    Json(req): Json<PermissionsRequest>,
) -> IdentityResult<Json<AccountView>> {
    let account = ctx
        .admin_manager
        .grant_permissions(&auth.account, id, req.into_capabilities()?)
        .await?;
    Ok(Json(AccountView::from(&account)))
}

async fn revoke_permissions(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<i64>,
    Json(req): Json<PermissionsRequest>,
) -> IdentityResult<Json<AccountView>> {
    let account = ctx
        .admin_manager
        .revoke_permissions(&auth.account, id, req.into_capabilities()?)
        .await?;
    Ok(Json(AccountView::from(&account)))
}

async fn bulk(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(req): Json<BulkRequest>,
) -> IdentityResult<Json<BulkOutcome>> {
    let (action, ids) = req.into_parts()?;
    let outcome = ctx.admin_manager.bulk(&auth.account, action, ids).await?;
    Ok(Json(outcome))
}
