use std::path::PathBuf;

use serde::Deserialize;

use crate::store::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub production: bool,
    /// Postgres URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// 64 hex chars. `None` means an ephemeral key outside production.
    pub master_key: Option<String>,
    /// YAML ruleset. `None` means the built-in default ruleset.
    pub policy_path: Option<PathBuf>,
    /// Mount `GET /_debug/decrypt/:id`.
    /// Set via CREDGATE_ENABLE_DEBUG_DECRYPT. Default: false.
    pub enable_debug_decrypt: bool,
    pub allowed_origin: String,
    /// Set via CREDGATE_STORE_MAX_RETRIES. Default: 3.
    pub store_max_retries: u32,
}

impl Config {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.store_max_retries,
            ..RetryConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            production: false,
            database_url: None,
            master_key: None,
            policy_path: None,
            enable_debug_decrypt: false,
            allowed_origin: "http://localhost:3000".into(),
            store_max_retries: 3,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from any key lookup. `load()` passes the process environment.
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let env_mode = non_empty("CREDGATE_ENV")
        .or_else(|| non_empty("RUST_ENV"))
        .unwrap_or_default();
    let production = env_mode == "production";

    let defaults = Config::default();
    let config = Config {
        port: non_empty("CREDGATE_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        production,
        database_url: non_empty("DATABASE_URL"),
        master_key: non_empty("CREDGATE_MASTER_KEY"),
        policy_path: non_empty("CREDGATE_POLICY_PATH").map(PathBuf::from),
        enable_debug_decrypt: non_empty("CREDGATE_ENABLE_DEBUG_DECRYPT")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false),
        allowed_origin: non_empty("CREDGATE_ALLOWED_ORIGIN").unwrap_or(defaults.allowed_origin),
        store_max_retries: non_empty("CREDGATE_STORE_MAX_RETRIES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.store_max_retries),
    };

    if config.production {
        if config.database_url.is_none() {
            anyhow::bail!(
                "DATABASE_URL is not set. The in-memory store loses every credential \
                 on restart and cannot run in production."
            );
        }
        if config.enable_debug_decrypt {
            anyhow::bail!(
                "CREDGATE_ENABLE_DEBUG_DECRYPT is set. The plaintext reveal endpoint \
                 cannot be enabled in production."
            );
        }
        // key presence and format are checked by vault::provision
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert!(!config.production);
        assert!(config.database_url.is_none());
        assert!(!config.enable_debug_decrypt);
        assert_eq!(config.allowed_origin, "http://localhost:3000");
        assert_eq!(config.retry_config().max_retries, 3);
    }

    #[test]
    fn test_overrides() {
        let config = from_lookup(lookup(&[
            ("CREDGATE_PORT", "9090"),
            ("DATABASE_URL", "postgres://localhost/credgate"),
            ("CREDGATE_POLICY_PATH", "/etc/credgate/policy.yaml"),
            ("CREDGATE_ENABLE_DEBUG_DECRYPT", "true"),
            ("CREDGATE_STORE_MAX_RETRIES", "0"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/credgate")
        );
        assert_eq!(
            config.policy_path,
            Some(PathBuf::from("/etc/credgate/policy.yaml"))
        );
        assert!(config.enable_debug_decrypt);
        assert_eq!(config.store_max_retries, 0);
    }

    #[test]
    fn test_rust_env_fallback() {
        let config = from_lookup(lookup(&[
            ("RUST_ENV", "production"),
            ("DATABASE_URL", "postgres://db/credgate"),
        ]))
        .unwrap();
        assert!(config.production);
    }

    #[test]
    fn test_production_refuses_memory_store() {
        let err = from_lookup(lookup(&[("CREDGATE_ENV", "production")])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_production_refuses_debug_endpoint() {
        let err = from_lookup(lookup(&[
            ("CREDGATE_ENV", "production"),
            ("DATABASE_URL", "postgres://db/credgate"),
            ("CREDGATE_ENABLE_DEBUG_DECRYPT", "1"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CREDGATE_ENABLE_DEBUG_DECRYPT"));
    }

    #[test]
    fn test_unparsable_port_falls_back() {
        let config = from_lookup(lookup(&[("CREDGATE_PORT", "http")])).unwrap();
        assert_eq!(config.port, 8080);
    }
}
