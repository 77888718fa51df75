/// Authentication endpoints
use crate::{
    account::{
        AccountView, AuthResponse, EmailRequest, LoginRequest, MessageResponse, RegisterRequest,
        RegistrationResponse, ResetPasswordRequest, VerificationOutcome, VerifyEmailQuery,
    },
    auth::AuthContext,
    context::AppContext,
    error::IdentityResult,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

/// Build authentication routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/admin-login", post(admin_login))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        // Mail clients open links with GET
        .route("/auth/verify-email", get(verify_email).post(verify_email))
        .route("/auth/resend-verification", post(resend_verification))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> IdentityResult<(StatusCode, Json<RegistrationResponse>)> {
    let cmd = req.into_command()?;
    let registration = ctx.account_manager.register(cmd).await?;

    let verification_required = ctx
        .account_manager
        .requires_verification(&registration.account);

    Ok((
        StatusCode::CREATED,
        Json(RegistrationResponse {
            account: AccountView::from(&registration.account),
            token: registration.token.map(|t| t.plaintext),
            verification_required,
        }),
    ))
}

async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> IdentityResult<Json<AuthResponse>> {
    let session = ctx.account_manager.login(req.into_command()?).await?;
    Ok(Json(AuthResponse::new(&session.account, &session.token)))
}

async fn admin_login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> IdentityResult<Json<AuthResponse>> {
    let session = ctx.account_manager.admin_login(req.into_command()?).await?;
    Ok(Json(AuthResponse::new(&session.account, &session.token)))
}

async fn logout(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> IdentityResult<Json<MessageResponse>> {
    ctx.account_manager.logout(auth.token_id).await?;
    Ok(Json(MessageResponse::new("Logged out")))
}

#[derive(Debug, Serialize)]
struct LogoutAllResponse {
    message: String,
    revoked: u64,
}

async fn logout_all(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> IdentityResult<Json<LogoutAllResponse>> {
    let revoked = ctx.account_manager.logout_all(auth.account.id).await?;
    Ok(Json(LogoutAllResponse {
        message: "Logged out of all sessions".to_string(),
        revoked,
    }))
}

#[derive(Debug, Serialize)]
struct VerifyEmailResponse {
    message: String,
    account: AccountView,
}

async fn verify_email(
    State(ctx): State<AppContext>,
    Query(query): Query<VerifyEmailQuery>,
) -> IdentityResult<Json<VerifyEmailResponse>> {
    let outcome = ctx.account_manager.verify_email(query.into_command()?).await?;

    let message = match &outcome {
        VerificationOutcome::Verified(_) => "Email verified",
        VerificationOutcome::AlreadyVerified(_) => "Email already verified",
    };

    Ok(Json(VerifyEmailResponse {
        message: message.to_string(),
        account: AccountView::from(outcome.account()),
    }))
}

async fn resend_verification(
    State(ctx): State<AppContext>,
    Json(req): Json<EmailRequest>,
) -> IdentityResult<Json<MessageResponse>> {
    ctx.account_manager
        .resend_verification(&req.into_email()?)
        .await?;
    Ok(Json(MessageResponse::new(
        "If that address belongs to an unverified account, a new verification link has been sent",
    )))
}

async fn forgot_password(
    State(ctx): State<AppContext>,
    Json(req): Json<EmailRequest>,
) -> IdentityResult<Json<MessageResponse>> {
    ctx.account_manager.forgot_password(&req.into_email()?).await?;
    Ok(Json(MessageResponse::new(
        "If that address is registered, a password reset token has been sent",
    )))
}

async fn reset_password(
    State(ctx): State<AppContext>,
    Json(req): Json<ResetPasswordRequest>,
) -> IdentityResult<Json<MessageResponse>> {
    ctx.account_manager
        .reset_password(req.into_command()?)
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}
