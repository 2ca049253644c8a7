//! Process configuration read from the environment.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;
use tracing::warn;

use shopledger_auth::{PolicyError, RolePolicy};
use shopledger_infra::RetryPolicy;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read role policy {path}: {source}")]
    PolicyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// `None` selects the in-memory document store.
    pub database_url: Option<String>,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub request_timeout: Duration,
    /// `None` selects [`RolePolicy::builtin`].
    pub role_policy_path: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            database_url: None,
            max_attempts: 5,
            retry_base: Duration::from_millis(25),
            request_timeout: Duration::from_millis(10_000),
            role_policy_path: None,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Malformed values fall back to
    /// the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            defaults.jwt_secret.clone()
        });

        Self {
            bind_addr: parsed(var("BIND_ADDR"), "BIND_ADDR", defaults.bind_addr),
            jwt_secret,
            database_url: var("DATABASE_URL"),
            max_attempts: parsed::<u32>(var("LEDGER_MAX_ATTEMPTS"), "LEDGER_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            retry_base: Duration::from_millis(parsed(
                var("LEDGER_RETRY_BASE_MS"),
                "LEDGER_RETRY_BASE_MS",
                defaults.retry_base.as_millis() as u64,
            )),
            request_timeout: Duration::from_millis(parsed(
                var("REQUEST_TIMEOUT_MS"),
                "REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            )),
            role_policy_path: var("ROLE_POLICY_PATH").map(PathBuf::from),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, self.retry_base, self.retry_base.saturating_mul(40))
    }

    /// Load the role policy. A configured but unreadable or malformed file is
    /// a startup error.
    pub fn load_role_policy(&self) -> Result<RolePolicy, ConfigError> {
        match &self.role_policy_path {
            None => Ok(RolePolicy::builtin()),
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::PolicyFile {
                    path: path.clone(),
                    source,
                })?;
                Ok(RolePolicy::from_json(&raw)?)
            }
        }
    }
}

fn parsed<T: std::str::FromStr>(raw: Option<String>, name: &str, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "malformed configuration value; using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(vars: &[(&str, &str)]) -> ApiConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ApiConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = from(&[]);
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.retry_base, Duration::from_millis(25));
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
        assert!(cfg.role_policy_path.is_none());
    }

    #[test]
    fn values_are_read() {
        let cfg = from(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("JWT_SECRET", "s3cret"),
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("LEDGER_MAX_ATTEMPTS", "8"),
            ("LEDGER_RETRY_BASE_MS", "5"),
            ("REQUEST_TIMEOUT_MS", "250"),
        ]);
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.jwt_secret, "s3cret");
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/ledger"));
        assert_eq!(cfg.max_attempts, 8);
        assert_eq!(cfg.retry_base, Duration::from_millis(5));
        assert_eq!(cfg.request_timeout, Duration::from_millis(250));
        assert_eq!(cfg.retry_policy().max_attempts, 8);
    }

    #[test]
    fn malformed_values_fall_back() {
        let cfg = from(&[("LEDGER_MAX_ATTEMPTS", "many"), ("BIND_ADDR", "nowhere"), ("REQUEST_TIMEOUT_MS", "-1")]);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(from(&[("LEDGER_MAX_ATTEMPTS", "0")]).max_attempts, 1);
    }

    #[test]
    fn missing_policy_file_is_an_error() {
        let cfg = from(&[("ROLE_POLICY_PATH", "/definitely/not/here.json")]);
        assert!(matches!(cfg.load_role_policy(), Err(ConfigError::PolicyFile { .. })));
    }

    #[test]
    fn no_policy_path_uses_builtin() {
        assert_eq!(from(&[]).load_role_policy().unwrap(), RolePolicy::builtin());
    }
}
