//! Environment configuration shared across the workspace.
//!
//! Mirrors the original implementation's `blazel.config` module: a
//! thin wrapper around a handful of environment variables, with no
//! external configuration service.

use std::env;

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";

/// Deployment environment. Selects the default database name and the
/// `<name>-<env>` suffix used for state machines and remote resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Env {
    Dev,
    Prod,
}

impl Env {
    pub fn current() -> Self {
        match env::var("APP_ENV").as_deref() {
            Ok("prod") => Env::Prod,
            _ => Env::Dev,
        }
    }

    pub fn set(self) {
        env::set_var("APP_ENV", self.as_str());
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Env::Dev => "dev",
            Env::Prod => "prod",
        }
    }

    pub fn is_prod(self) -> bool {
        matches!(self, Env::Prod)
    }
}

impl std::str::FromStr for Env {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Env::Dev),
            "prod" => Ok(Env::Prod),
            other => Err(anyhow::anyhow!("unknown environment {other:?}")),
        }
    }
}

/// Derive the warehouse database name for the current environment,
/// honoring `DATABASE_NAME_PROD` / `DATABASE_NAME_DEV` overrides.
pub fn database_name() -> String {
    if Env::current().is_prod() {
        env::var("DATABASE_NAME_PROD").unwrap_or_else(|_| "sources".to_string())
    } else {
        env::var("DATABASE_NAME_DEV").unwrap_or_else(|_| "sources_dev".to_string())
    }
}

/// External warehouse stage location used when generating COPY
/// statements, e.g. `public.stage`.
pub fn database_stage() -> String {
    env::var("DATABASE_STAGE").unwrap_or_else(|_| "public.stage".to_string())
}

/// Path to the catalog's declarative YAML document.
pub fn tables_yaml_path() -> Option<String> {
    env::var("TABLES_YAML_PATH").ok()
}

/// Used only for extract progress-reporting math, not for real
/// cancellation (see `Deadline` for that).
pub fn aws_lambda_timeout_ms() -> i64 {
    env::var("AWS_LAMBDA_TIMEOUT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(900_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test_helpers::with_env_lock;

    #[test]
    fn defaults_to_dev_database() {
        with_env_lock(|| {
            env::remove_var("APP_ENV");
            env::remove_var("DATABASE_NAME_DEV");
            assert_eq!(database_name(), "sources_dev");
        });
    }

    #[test]
    fn prod_honors_override() {
        with_env_lock(|| {
            env::set_var("APP_ENV", "prod");
            env::set_var("DATABASE_NAME_PROD", "warehouse_prod");
            assert_eq!(database_name(), "warehouse_prod");
            env::remove_var("APP_ENV");
            env::remove_var("DATABASE_NAME_PROD");
        });
    }
}

#[cfg(test)]
mod serial_test_helpers {
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Environment variable tests must not interleave; cargo test runs
    /// them on separate threads by default.
    pub fn with_env_lock<F: FnOnce()>(f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }
}
