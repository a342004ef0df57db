//! Hub configuration from the environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

const DEFAULT_DATA_DIR: &str = ".hub-data";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_ROUTE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_TURNS: u32 = 50;
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid bind address {value:?}: {message}")]
    InvalidBindAddr { value: String, message: String },
}

/// Runtime settings for the hub binary
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub route_timeout: Duration,
    pub hooks_file: Option<PathBuf>,
    pub max_turns: u32,
    pub anthropic_api_key: String,
    pub anthropic_base_url: String,
    pub anthropic_version: String,
    /// Forward agent events to subscribed peers
    pub forward_events: bool,
}

impl HubConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_raw = lookup("HUB_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidBindAddr {
                value: bind_raw.clone(),
                message: e.to_string(),
            })?;

        let route_timeout_secs = parse_or(
            &lookup,
            "HUB_ROUTE_TIMEOUT_SECS",
            DEFAULT_ROUTE_TIMEOUT_SECS,
        );

        let anthropic_api_key = lookup("ANTHROPIC_API_KEY").unwrap_or_default();
        if anthropic_api_key.is_empty() {
            warn!("ANTHROPIC_API_KEY is not set; provider calls will be rejected");
        }

        Ok(Self {
            data_dir: lookup("HUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            bind_addr,
            route_timeout: Duration::from_secs(route_timeout_secs),
            hooks_file: lookup("HUB_HOOKS_FILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            max_turns: parse_or(&lookup, "HUB_MAX_TURNS", DEFAULT_MAX_TURNS),
            anthropic_api_key,
            anthropic_base_url: lookup("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            anthropic_version: lookup("ANTHROPIC_VERSION")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string()),
            forward_events: env_flag(lookup("HUB_FORWARD_EVENTS"), true),
        })
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    match lookup(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid {}={:?}, using {}", name, raw, default);
                default
            }
        },
        None => default,
    }
}

fn env_flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<HubConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HubConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from(".hub-data"));
        assert_eq!(config.bind_addr.port(), 8081);
        assert_eq!(config.route_timeout, Duration::from_secs(30));
        assert_eq!(config.max_turns, 50);
        assert!(config.hooks_file.is_none());
        assert_eq!(config.anthropic_base_url, "https://api.anthropic.com");
        assert_eq!(config.anthropic_version, "2023-06-01");
        assert!(config.forward_events);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("HUB_DATA_DIR", "/tmp/hub"),
            ("HUB_BIND_ADDR", "127.0.0.1:9000"),
            ("HUB_ROUTE_TIMEOUT_SECS", "5"),
            ("HUB_HOOKS_FILE", "hooks.json"),
            ("HUB_MAX_TURNS", "3"),
            ("HUB_FORWARD_EVENTS", "off"),
        ])
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/hub"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.route_timeout, Duration::from_secs(5));
        assert_eq!(config.hooks_file, Some(PathBuf::from("hooks.json")));
        assert_eq!(config.max_turns, 3);
        assert!(!config.forward_events);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = config_from(&[
            ("HUB_ROUTE_TIMEOUT_SECS", "soon"),
            ("HUB_MAX_TURNS", "-1"),
        ])
        .unwrap();
        assert_eq!(config.route_timeout, Duration::from_secs(30));
        assert_eq!(config.max_turns, 50);
    }

    #[test]
    fn test_invalid_bind_addr_is_rejected() {
        let err = config_from(&[("HUB_BIND_ADDR", "nowhere")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
    }

    #[test]
    fn test_env_flag_values() {
        assert!(env_flag(Some("YES".into()), false));
        assert!(!env_flag(Some("0".into()), true));
        assert!(env_flag(Some("maybe".into()), true));
        assert!(!env_flag(None, false));
    }
}
