/// Background task implementations
use crate::{context::AppContext, error::IdentityResult};

/// Delete bearer tokens past their expiry
pub async fn cleanup_expired_tokens(ctx: &AppContext) -> IdentityResult<u64> {
    ctx.tokens.purge_expired().await
}

/// Delete password reset records older than the reset window
pub async fn cleanup_expired_password_resets(ctx: &AppContext) -> IdentityResult<u64> {
    ctx.resets.purge_expired().await
}

/// Forget rate-limit keys whose allowance has fully replenished
pub fn prune_rate_limiter(ctx: &AppContext) -> usize {
    ctx.rate_limiter.retain_recent();
    ctx.rate_limiter.tracked_keys()
}

/// Health check - verify all systems are operational
pub async fn health_check(ctx: &AppContext) -> IdentityResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.account_db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::store::NewAccount;
    use crate::admin::Role;
    use crate::clock::testing::FixedClock;
    use crate::clock::Clock;
    use crate::config::ServerConfig;
    use crate::crypto::testing::CountingRandom;
    use crate::crypto::Argon2Hasher;
    use crate::db::connect_in_memory;
    use crate::mailer::Mailer;
    use chrono::Duration;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    async fn setup() -> (AppContext, Arc<FixedClock>) {
        let pool = connect_in_memory().await.unwrap();
        let clock = Arc::new(FixedClock::default());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let ctx = AppContext::from_parts(
            ServerConfig::for_testing(),
            pool,
            dyn_clock,
            Arc::new(Argon2Hasher::fast().unwrap()),
            Arc::new(CountingRandom::default()),
            Mailer::disabled(),
        );
        (ctx, clock)
    }

    #[tokio::test]
    async fn test_token_and_reset_sweeps() {
        let (ctx, clock) = setup().await;
        let account = ctx
            .accounts
            .create(NewAccount {
                username: "bob".to_string(),
                name: "Bob".to_string(),
                email: Some("bob@example.com".to_string()),
                password_hash: "unused".to_string(),
                role: Role::User,
                permissions: BTreeSet::new(),
                email_verified: true,
            })
            .await
            .unwrap();

        ctx.tokens
            .issue(account.id, "short", Some(Duration::minutes(5)))
            .await
            .unwrap();
        ctx.tokens.issue(account.id, "forever", None).await.unwrap();
        ctx.resets.create("bob@example.com").await.unwrap();

        assert_eq!(cleanup_expired_tokens(&ctx).await.unwrap(), 0);
        assert_eq!(cleanup_expired_password_resets(&ctx).await.unwrap(), 0);

        clock.advance(Duration::hours(2));

        assert_eq!(cleanup_expired_tokens(&ctx).await.unwrap(), 1);
        assert_eq!(cleanup_expired_password_resets(&ctx).await.unwrap(), 1);
        assert_eq!(ctx.tokens.list_for_account(account.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (ctx, _) = setup().await;
        health_check(&ctx).await.unwrap();
        assert_eq!(prune_rate_limiter(&ctx), 0);
    }
}
