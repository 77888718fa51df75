use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::metrics;

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        // Spawn cleanup tasks
        tokio::spawn(Self::expired_token_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::expired_reset_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::rate_limiter_prune_job(Arc::clone(&self)));

        // Spawn monitoring tasks
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Cleanup expired bearer tokens (runs every hour)
    async fn expired_token_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;
            let start = Instant::now();

            match tasks::cleanup_expired_tokens(&scheduler.context).await {
                Ok(count) => {
                    metrics::record_background_job("token_sweep", "success", start.elapsed().as_secs_f64());
                    if count > 0 {
                        info!("Cleaned up {} expired tokens", count);
                    }
                }
                Err(e) => {
                    metrics::record_background_job("token_sweep", "failure", start.elapsed().as_secs_f64());
                    error!("Failed to cleanup expired tokens: {}", e);
                }
            }
        }
    }

    /// Cleanup expired password reset records (runs every 15 minutes)
    async fn expired_reset_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(900));

        loop {
            interval.tick().await;
            let start = Instant::now();

            match tasks::cleanup_expired_password_resets(&scheduler.context).await {
                Ok(count) => {
                    metrics::record_background_job("reset_sweep", "success", start.elapsed().as_secs_f64());
                    if count > 0 {
                        info!("Cleaned up {} expired password reset records", count);
                    }
                }
                Err(e) => {
                    metrics::record_background_job("reset_sweep", "failure", start.elapsed().as_secs_f64());
                    error!("Failed to cleanup password reset records: {}", e);
                }
            }
        }
    }

    /// Drop idle rate-limit keys (runs every 10 minutes)
    async fn rate_limiter_prune_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(600));

        loop {
            interval.tick().await;
            let start = Instant::now();

            let remaining = tasks::prune_rate_limiter(&scheduler.context);
            metrics::record_background_job("rate_limit_prune", "success", start.elapsed().as_secs_f64());
            debug!("Rate limiter pruned, {} keys still tracked", remaining);
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            if let Err(e) = tasks::health_check(&scheduler.context).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}
