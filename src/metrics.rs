/// Metrics and telemetry for Aurora Gate
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Login outcomes and rate-limit rejections
/// - Bearer token issuance and revocation
/// - Account lifecycle transitions
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("register http_requests_total");

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("register http_request_duration_seconds");

    // ========== Authentication Metrics ==========

    /// Login attempts by kind (user/admin) and outcome
    pub static ref LOGINS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "logins_total",
        "Total number of login attempts",
        &["kind", "outcome"]
    )
    .expect("register logins_total");

    /// Requests rejected by the rate limiter, per bucket
    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limit_rejections_total",
        "Total number of rate-limited requests",
        &["bucket"]
    )
    .expect("register rate_limit_rejections_total");

    /// Bearer tokens issued
    pub static ref TOKENS_ISSUED_TOTAL: IntCounter = register_int_counter!(
        "tokens_issued_total",
        "Total number of bearer tokens issued"
    )
    .expect("register tokens_issued_total");

    /// Bearer tokens revoked by reason
    pub static ref TOKENS_REVOKED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tokens_revoked_total",
        "Total number of bearer tokens revoked",
        &["reason"]
    )
    .expect("register tokens_revoked_total");

    // ========== Account Metrics ==========

    /// Accounts created by role
    pub static ref ACCOUNT_CREATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "account_creations_total",
        "Total number of accounts created",
        &["role"]
    )
    .expect("register account_creations_total");

    /// Lifecycle transitions (suspend, restore, purge)
    pub static ref LIFECYCLE_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lifecycle_transitions_total",
        "Total number of account lifecycle transitions",
        &["transition"]
    )
    .expect("register lifecycle_transitions_total");

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .expect("register background_jobs_total");

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .expect("register background_job_duration_seconds");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a login attempt
pub fn record_login(kind: &str, outcome: &str) {
    LOGINS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Record a rate-limit rejection
pub fn record_rate_limited(bucket: &str) {
    RATE_LIMIT_REJECTIONS_TOTAL.with_label_values(&[bucket]).inc();
}

/// Record a token issuance
pub fn record_token_issued() {
    TOKENS_ISSUED_TOTAL.inc();
}

/// Record token revocations
pub fn record_tokens_revoked(reason: &str, count: u64) {
    if count > 0 {
        TOKENS_REVOKED_TOTAL.with_label_values(&[reason]).inc_by(count);
    }
}

/// Record an account creation
pub fn record_account_creation(role: &str) {
    ACCOUNT_CREATIONS_TOTAL.with_label_values(&[role]).inc();
}

/// Record a lifecycle transition
pub fn record_lifecycle_transition(transition: &str) {
    LIFECYCLE_TRANSITIONS_TOTAL
        .with_label_values(&[transition])
        .inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}
