use crate::error::ConfigError;
use crate::utils::rpc::{
    RetryPolicy, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_MS,
    DEFAULT_RETRY_CAP_MS,
};
use alloy::primitives::Address;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_DB_PATH: &str = "mirror.db";
pub const DEFAULT_LOOKBACK_DAYS: u64 = 30;
pub const DEFAULT_LOG_CHUNK_BLOCKS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Sync once, print, exit.
    Once,
    /// Sync, then poll until interrupted.
    Follow,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    pub chain_id: u64,
    pub module_address: Address,
    /// Read from the module's `oracle()` when unset.
    pub oracle_address: Option<Address>,
    pub db_path: PathBuf,
    pub lookback_days: u64,
    pub log_chunk_blocks: u64,
    pub poll_interval_ms: u64,
    pub retry: RetryPolicy,
    pub run_mode: RunMode,
}

fn validate_http_url(name: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::Invalid(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))),
    }
}

fn parse_address(name: &str, raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw.trim())
        .map_err(|e| ConfigError::Invalid(format!("{name} must be a 20-byte hex address: {e}")))
}

fn parse_u64_or(name: &str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| ConfigError::Invalid(format!("{name} must be a valid u64, got `{v}`"))),
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = lookup("MIRROR_RPC_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::Missing("MIRROR_RPC_URL must be set".to_string()))?;
        validate_http_url("MIRROR_RPC_URL", &rpc_url)?;

        let fallback_rpc_urls: Vec<String> = lookup("MIRROR_FALLBACK_RPC_URLS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        for url in &fallback_rpc_urls {
            validate_http_url("MIRROR_FALLBACK_RPC_URLS entry", url)?;
        }

        let chain_id_raw = lookup("CHAIN_ID")
            .ok_or_else(|| ConfigError::Missing("CHAIN_ID must be set".to_string()))?;
        let chain_id = chain_id_raw.trim().parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!("CHAIN_ID must be a valid u64, got `{chain_id_raw}`"))
        })?;

        let module_raw = lookup("REALITY_MODULE_ADDRESS").ok_or_else(|| {
            ConfigError::Missing("REALITY_MODULE_ADDRESS must be set".to_string())
        })?;
        let module_address = parse_address("REALITY_MODULE_ADDRESS", &module_raw)?;
        let oracle_address = match lookup("REALITY_ORACLE_ADDRESS")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        {
            Some(raw) => Some(parse_address("REALITY_ORACLE_ADDRESS", &raw)?),
            None => None,
        };

        let log_chunk_blocks = parse_u64_or(
            "LOG_CHUNK_BLOCKS",
            lookup("LOG_CHUNK_BLOCKS"),
            DEFAULT_LOG_CHUNK_BLOCKS,
        )?;
        if log_chunk_blocks == 0 {
            return Err(ConfigError::Invalid(
                "LOG_CHUNK_BLOCKS must be greater than zero".to_string(),
            ));
        }

        let retry = RetryPolicy {
            attempts: parse_u64_or(
                "RPC_RETRY_ATTEMPTS",
                lookup("RPC_RETRY_ATTEMPTS"),
                DEFAULT_RETRY_ATTEMPTS as u64,
            )?
            .max(1) as usize,
            base_delay_ms: parse_u64_or(
                "RPC_RETRY_BASE_MS",
                lookup("RPC_RETRY_BASE_MS"),
                DEFAULT_RETRY_BASE_MS,
            )?,
            max_delay_ms: parse_u64_or(
                "RPC_RETRY_CAP_MS",
                lookup("RPC_RETRY_CAP_MS"),
                DEFAULT_RETRY_CAP_MS,
            )?,
            call_timeout_ms: parse_u64_or(
                "RPC_CALL_TIMEOUT_MS",
                lookup("RPC_CALL_TIMEOUT_MS"),
                DEFAULT_CALL_TIMEOUT_MS,
            )?,
        };

        let run_mode = match lookup("MIRROR_RUN_MODE")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("follow") => RunMode::Follow,
            Some("once") => RunMode::Once,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "MIRROR_RUN_MODE must be `once` or `follow`, got `{other}`"
                )))
            }
        };

        Ok(Self {
            rpc_url,
            fallback_rpc_urls,
            chain_id,
            module_address,
            oracle_address,
            db_path: lookup("MIRROR_DB_PATH")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            lookback_days: parse_u64_or(
                "MIRROR_LOOKBACK_DAYS",
                lookup("MIRROR_LOOKBACK_DAYS"),
                DEFAULT_LOOKBACK_DAYS,
            )?,
            log_chunk_blocks,
            poll_interval_ms: parse_u64_or(
                "POLL_INTERVAL_MS",
                lookup("POLL_INTERVAL_MS"),
                DEFAULT_POLL_INTERVAL_MS,
            )?
            .max(1),
            retry,
            run_mode,
        })
    }

    /// Defaults for everything but the endpoint and contracts.
    pub fn new(rpc_url: &str, chain_id: u64, module_address: Address) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            fallback_rpc_urls: Vec::new(),
            chain_id,
            module_address,
            oracle_address: None,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            log_chunk_blocks: DEFAULT_LOG_CHUNK_BLOCKS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry: RetryPolicy::default(),
            run_mode: RunMode::Follow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const MODULE: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("MIRROR_RPC_URL", "https://rpc.example.org"),
            ("CHAIN_ID", "100"),
            ("REALITY_MODULE_ADDRESS", MODULE),
        ]))
        .expect("valid config");
        assert_eq!(cfg.chain_id, 100);
        assert_eq!(cfg.oracle_address, None);
        assert_eq!(cfg.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(cfg.log_chunk_blocks, DEFAULT_LOG_CHUNK_BLOCKS);
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.run_mode, RunMode::Follow);
        assert!(cfg.fallback_rpc_urls.is_empty());
    }

    #[test]
    fn test_missing_rpc_url_is_reported() {
        let err = Config::from_lookup(lookup_from(&[
            ("CHAIN_ID", "1"),
            ("REALITY_MODULE_ADDRESS", MODULE),
        ]))
        .expect_err("rpc url required");
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_rejects_non_http_fallback_and_zero_chunk() {
        let err = Config::from_lookup(lookup_from(&[
            ("MIRROR_RPC_URL", "https://rpc.example.org"),
            ("MIRROR_FALLBACK_RPC_URLS", "https://a.example.org, wss://b.example.org"),
            ("CHAIN_ID", "1"),
            ("REALITY_MODULE_ADDRESS", MODULE),
        ]))
        .expect_err("ws fallback rejected");
        assert!(err.to_string().contains("http(s)"));

        let err = Config::from_lookup(lookup_from(&[
            ("MIRROR_RPC_URL", "https://rpc.example.org"),
            ("CHAIN_ID", "1"),
            ("REALITY_MODULE_ADDRESS", MODULE),
            ("LOG_CHUNK_BLOCKS", "0"),
        ]))
        .expect_err("zero chunk rejected");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("MIRROR_RPC_URL", "http://localhost:8545"),
            ("MIRROR_FALLBACK_RPC_URLS", "https://a.example.org,,https://b.example.org"),
            ("CHAIN_ID", "1"),
            ("REALITY_MODULE_ADDRESS", MODULE),
            ("REALITY_ORACLE_ADDRESS", "0x2222222222222222222222222222222222222222"),
            ("RPC_RETRY_ATTEMPTS", "0"),
            ("MIRROR_RUN_MODE", "ONCE"),
            ("MIRROR_LOOKBACK_DAYS", "7"),
        ]))
        .expect("valid config");
        assert_eq!(cfg.fallback_rpc_urls.len(), 2);
        assert!(cfg.oracle_address.is_some());
        assert_eq!(cfg.retry.attempts, 1);
        assert_eq!(cfg.run_mode, RunMode::Once);
        assert_eq!(cfg.lookback_days, 7);
    }
}
