/// Configuration management for Aurora Gate
use crate::error::{IdentityError, IdentityResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub email: Option<EmailConfig>,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Externally reachable base URL used when rendering links in mail
    pub public_url: String,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub account_db: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Server secret for signed links
    pub app_key: String,
    /// Whether `user` accounts must verify their email before logging in
    pub require_email_verification: bool,
    pub signed_link_ttl_minutes: i64,
    pub password_reset_ttl_minutes: i64,
    /// Bearer token lifetime; `None` keeps tokens until revoked
    pub token_ttl_minutes: Option<i64>,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Upper bound for every configured TTL (one year)
pub const MAX_TTL_MINUTES: i64 = 525_600;

/// Attempts allowed per window for one rate-limited bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_attempts: u32,
    pub window_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub login: RateLimitRule,
    pub password_reset: RateLimitRule,
    /// Reset-token submissions, keyed by email
    pub reset_submit: RateLimitRule,
    pub verification: RateLimitRule,
    pub change_password: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            login: RateLimitRule {
                max_attempts: 5,
                window_secs: 60,
            },
            password_reset: RateLimitRule {
                max_attempts: 3,
                window_secs: 3600,
            },
            reset_submit: RateLimitRule {
                max_attempts: 5,
                window_secs: 900,
            },
            verification: RateLimitRule {
                max_attempts: 6,
                window_secs: 60,
            },
            change_password: RateLimitRule {
                max_attempts: 5,
                window_secs: 60,
            },
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn rule_from_env(prefix: &str, default: RateLimitRule) -> RateLimitRule {
    RateLimitRule {
        max_attempts: env_parse(&format!("{}_ATTEMPTS", prefix), default.max_attempts),
        window_secs: env_parse(&format!("{}_WINDOW_SECS", prefix), default.window_secs),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> IdentityResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("GATE_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("GATE_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| IdentityError::Internal("Invalid port number".to_string()))?;
        let public_url = env::var("GATE_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", hostname, port));
        let version = env::var("GATE_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let data_directory: PathBuf = env::var("GATE_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let account_db = env::var("GATE_ACCOUNT_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("accounts.sqlite"));

        let app_key = env::var("GATE_APP_KEY")
            .map_err(|_| IdentityError::Internal("GATE_APP_KEY is required".to_string()))?;
        let require_email_verification = env_parse("GATE_REQUIRE_EMAIL_VERIFICATION", true);
        let signed_link_ttl_minutes = env_parse("GATE_SIGNED_LINK_TTL_MINUTES", 60);
        let password_reset_ttl_minutes = env_parse("GATE_PASSWORD_RESET_TTL_MINUTES", 60);
        let token_ttl_minutes = env::var("GATE_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|v| v.trim().parse().ok());

        let email = if let Ok(smtp_url) = env::var("GATE_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("GATE_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            enabled: env_parse("GATE_RATE_LIMITS_ENABLED", true),
            login: rule_from_env("GATE_RATE_LIMIT_LOGIN", defaults.login),
            password_reset: rule_from_env("GATE_RATE_LIMIT_RESET", defaults.password_reset),
            reset_submit: rule_from_env("GATE_RATE_LIMIT_RESET_SUBMIT", defaults.reset_submit),
            verification: rule_from_env("GATE_RATE_LIMIT_VERIFICATION", defaults.verification),
            change_password: rule_from_env(
                "GATE_RATE_LIMIT_CHANGE_PASSWORD",
                defaults.change_password,
            ),
        };

        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let json = env::var("GATE_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                public_url,
                version,
            },
            storage: StorageConfig {
                data_directory,
                account_db,
            },
            authentication: AuthConfig {
                app_key,
                require_email_verification,
                signed_link_ttl_minutes,
                password_reset_ttl_minutes,
                token_ttl_minutes,
            },
            email,
            rate_limit,
            logging: LoggingConfig { level, json },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> IdentityResult<()> {
        if self.service.hostname.is_empty() {
            return Err(IdentityError::Internal("Hostname cannot be empty".to_string()));
        }

        if self.authentication.app_key.len() < 32 {
            return Err(IdentityError::Internal(
                "App key must be at least 32 characters".to_string(),
            ));
        }

        let ttl_in_range = |ttl: i64| (1..=MAX_TTL_MINUTES).contains(&ttl);

        if !ttl_in_range(self.authentication.signed_link_ttl_minutes)
            || !ttl_in_range(self.authentication.password_reset_ttl_minutes)
        {
            return Err(IdentityError::Internal(format!(
                "Link and reset TTLs must be between 1 and {} minutes",
                MAX_TTL_MINUTES
            )));
        }

        if matches!(self.authentication.token_ttl_minutes, Some(ttl) if !ttl_in_range(ttl)) {
            return Err(IdentityError::Internal(format!(
                "Token TTL must be between 1 and {} minutes when set",
                MAX_TTL_MINUTES
            )));
        }

        let rules = [
            self.rate_limit.login,
            self.rate_limit.password_reset,
            self.rate_limit.reset_submit,
            self.rate_limit.verification,
            self.rate_limit.change_password,
        ];
        if rules.iter().any(|r| r.max_attempts == 0 || r.window_secs == 0) {
            return Err(IdentityError::Internal(
                "Rate limit attempts and windows must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration for tests and local tooling
    pub fn for_testing() -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 8080,
                public_url: "http://localhost:8080".to_string(),
                version: "test".to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                account_db: PathBuf::from(":memory:"),
            },
            authentication: AuthConfig {
                app_key: "test-app-key-for-testing-only-0123456789".to_string(),
                require_email_verification: true,
                signed_link_ttl_minutes: 60,
                password_reset_ttl_minutes: 60,
                token_ttl_minutes: None,
            },
            email: None,
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_testing_config_is_valid() {
        assert!(ServerConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_short_app_key_rejected() {
        let mut config = ServerConfig::for_testing();
        config.authentication.app_key = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let mut config = ServerConfig::for_testing();
        config.rate_limit.login.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_ttls_rejected() {
        let mut config = ServerConfig::for_testing();
        config.authentication.signed_link_ttl_minutes = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::for_testing();
        config.authentication.password_reset_ttl_minutes = MAX_TTL_MINUTES + 1;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::for_testing();
        config.authentication.token_ttl_minutes = Some(i64::MAX / 2);
        assert!(config.validate().is_err());

        let mut config = ServerConfig::for_testing();
        config.authentication.signed_link_ttl_minutes = MAX_TTL_MINUTES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_positive_token_ttl_rejected() {
        let mut config = ServerConfig::for_testing();
        config.authentication.token_ttl_minutes = Some(0);
        assert!(config.validate().is_err());
    }
}
