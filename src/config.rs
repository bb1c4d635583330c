use anyhow::{Context, Result, anyhow, ensure};
use std::{
    env,
    net::SocketAddr,
    str::FromStr,
    time::Duration,
};

use crate::{
    ratelimit::RateLimitPolicy,
    validators::parse_location_string,
};

pub const APP_NAME: &str = "HeyPico Maps LLM";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const MIN_MAPS_KEY_LEN: usize = 20;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub debug: bool,
    pub environment: String,
    pub allowed_origins: Vec<String>,
    pub validation: ValidationConfig,
    pub rate_limit: RateLimitConfig,
    pub quota: QuotaConfig,
    pub llm: LlmConfig,
    pub maps: MapsConfig,
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub max_body_bytes: usize,
    pub allowed_methods: Vec<String>,
    pub max_headers: usize,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_window: u32,
    pub window_seconds: u64,
    pub burst_multiplier: f64,
    pub cleanup_interval_secs: u64,
    pub exempt_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub daily_limit: u64,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MapsConfig {
    pub api_key: String,
    pub frontend_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub default_search_radius: u32,
    pub max_search_results: usize,
    pub default_location: (f64, f64),
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            requests_per_window: self.requests_per_window,
            window_seconds: self.window_seconds,
            burst_multiplier: self.burst_multiplier,
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let validation = ValidationConfig {
            max_body_bytes: parse_env(&lookup, "MAX_BODY_BYTES", 65_536usize),
            allowed_methods: parse_csv(&lookup, "ALLOWED_METHODS", "GET,POST,OPTIONS")
                .into_iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            max_headers: parse_env(&lookup, "MAX_HEADERS", 100usize),
        };

        let rate_limit = RateLimitConfig {
            enabled: parse_env(&lookup, "RATE_LIMIT_ENABLED", true),
            requests_per_window: parse_env(&lookup, "RATE_LIMIT_REQUESTS", 100u32),
            window_seconds: parse_env(&lookup, "RATE_LIMIT_WINDOW", 3600u64),
            burst_multiplier: parse_env(&lookup, "RATE_LIMIT_BURST_MULTIPLIER", 1.5f64),
            cleanup_interval_secs: parse_env(&lookup, "RATE_LIMIT_CLEANUP_INTERVAL", 3600u64),
            exempt_paths: parse_csv(
                &lookup,
                "RATE_LIMIT_EXEMPT_PATHS",
                "/,/health,/docs,/openapi.json,/redoc",
            ),
        };
        ensure!(
            rate_limit.requests_per_window > 0,
            "RATE_LIMIT_REQUESTS must be greater than zero"
        );
        ensure!(
            rate_limit.window_seconds > 0,
            "RATE_LIMIT_WINDOW must be greater than zero"
        );
        ensure!(
            rate_limit.burst_multiplier.is_finite() && rate_limit.burst_multiplier >= 1.0,
            "RATE_LIMIT_BURST_MULTIPLIER must be at least 1.0"
        );
        ensure!(
            rate_limit.cleanup_interval_secs > 0,
            "RATE_LIMIT_CLEANUP_INTERVAL must be greater than zero"
        );

        let quota = QuotaConfig {
            daily_limit: parse_env(&lookup, "DAILY_QUOTA_LIMIT", 1000u64),
        };
        ensure!(quota.daily_limit > 0, "DAILY_QUOTA_LIMIT must be greater than zero");

        let llm = LlmConfig {
            base_url: trimmed_url(&lookup, "OLLAMA_BASE_URL", "http://localhost:11434"),
            model: lookup("LLM_MODEL").unwrap_or_else(|| "llama3.2".to_string()),
            temperature: parse_env(&lookup, "LLM_TEMPERATURE", 0.7f32),
            max_tokens: parse_env(&lookup, "LLM_MAX_TOKENS", 1024u32),
            timeout_secs: parse_env(&lookup, "LLM_TIMEOUT_SECS", 60u64).max(1),
        };

        let raw_location = lookup("DEFAULT_LOCATION").unwrap_or_else(|| "-7.7713,110.3774".into());
        let default_location = parse_location_string(&raw_location)
            .ok_or_else(|| anyhow!("invalid DEFAULT_LOCATION: {raw_location}"))?;

        let maps = MapsConfig {
            api_key: maps_key(&lookup, "GOOGLE_MAPS_API_KEY")?,
            frontend_key: maps_key(&lookup, "GOOGLE_MAPS_FRONTEND_KEY")?,
            base_url: trimmed_url(&lookup, "MAPS_BASE_URL", "https://maps.googleapis.com/maps/api"),
            timeout_secs: parse_env(&lookup, "MAPS_TIMEOUT_SECS", 30u64).max(1),
            default_search_radius: parse_env(&lookup, "DEFAULT_SEARCH_RADIUS", 5000u32),
            max_search_results: parse_env(&lookup, "MAX_SEARCH_RESULTS", 10usize),
            default_location,
        };

        Ok(Self {
            bind_addr,
            debug: parse_env(&lookup, "DEBUG", false),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            allowed_origins: parse_csv(
                &lookup,
                "ALLOWED_ORIGINS",
                "http://localhost:3000,http://127.0.0.1:3000",
            ),
            validation,
            rate_limit,
            quota,
            llm,
            maps,
        })
    }
}

/// Shows only the first and last four characters of a secret.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn maps_key<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();
    if !value.is_empty() && value.len() < MIN_MAPS_KEY_LEN {
        return Err(anyhow!("{key} appears to be invalid (too short)"));
    }
    Ok(value)
}

fn trimmed_url<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .trim_end_matches('/')
        .to_string()
}

fn parse_csv<F>(lookup: &F, key: &str, default: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{
        AppConfig,
        mask_key,
    };

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = config_from(&[]).unwrap();

        assert_eq!(cfg.bind_addr.port(), 8000);
        assert_eq!(cfg.rate_limit.requests_per_window, 100);
        assert_eq!(cfg.rate_limit.window_seconds, 3600);
        assert_eq!(cfg.rate_limit.burst_multiplier, 1.5);
        assert_eq!(cfg.rate_limit.cleanup_interval_secs, 3600);
        assert_eq!(cfg.quota.daily_limit, 1000);
        assert_eq!(cfg.llm.model, "llama3.2");
        assert_eq!(cfg.maps.default_location, (-7.7713, 110.3774));
        assert!(cfg.rate_limit.exempt_paths.contains(&"/health".to_string()));
        assert_eq!(cfg.rate_limit.policy().capacity(), 150.0);
    }

    #[test]
    fn rejects_degenerate_rate_limits() {
        assert!(config_from(&[("RATE_LIMIT_REQUESTS", "0")]).is_err());
        assert!(config_from(&[("RATE_LIMIT_WINDOW", "0")]).is_err());
        assert!(config_from(&[("RATE_LIMIT_BURST_MULTIPLIER", "0.5")]).is_err());
        assert!(config_from(&[("DAILY_QUOTA_LIMIT", "0")]).is_err());
    }

    #[test]
    fn rejects_short_maps_keys_but_allows_missing_ones() {
        assert!(config_from(&[("GOOGLE_MAPS_API_KEY", "short")]).is_err());

        let cfg = config_from(&[("GOOGLE_MAPS_API_KEY", "AIzaSyA-0123456789abcdefgh")]).unwrap();
        assert_eq!(cfg.maps.api_key, "AIzaSyA-0123456789abcdefgh");
        assert!(cfg.maps.frontend_key.is_empty());
    }

    #[test]
    fn strips_trailing_slashes_from_service_urls() {
        let cfg = config_from(&[("OLLAMA_BASE_URL", "http://ollama:11434/")]).unwrap();
        assert_eq!(cfg.llm.base_url, "http://ollama:11434");
    }

    #[test]
    fn rejects_out_of_range_default_location() {
        assert!(config_from(&[("DEFAULT_LOCATION", "91,0")]).is_err());
    }

    #[test]
    fn masks_secrets_for_logging() {
        assert_eq!(mask_key("AIzaSyA-0123456789abcdefgh"), "AIza...efgh");
        assert_eq!(mask_key("tiny"), "***");
    }
}
