// src/config/mod.rs
// Configuration for the storefront gate.
// Tunables come from GATE_* environment variables; defaults are defined in config/defaults.env.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use ipnet::IpNet;
use once_cell::sync::Lazy;
use thiserror::Error;

const DEFAULTS_ENV_TEXT: &str = include_str!("../../config/defaults.env");

pub const IP_KEY_PREFIX: &str = "ip_";
pub const CID_KEY_PREFIX: &str = "cid_";
pub const MISSING_CID_KEY: &str = "no-cid";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid compiled defaults: {0}")]
    Defaults(String),
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Where the country for a client IP comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoSource {
    EdgeHeader,
    CidrTable,
}

impl GeoSource {
    pub fn as_str(self) -> &'static str {
        match self {
            GeoSource::EdgeHeader => "edge_header",
            GeoSource::CidrTable => "cidr_table",
        }
    }
}

/// Fixed-window quota for one limiter key family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub limit: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    pub pg_address: String,
    pub timeout: Duration,
    pub integration_type: i32,
    pub active_status: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub allowed_country: String,
    pub geo_source: GeoSource,
    pub geo_header: String,
    pub geo_cidr_table: String,
    pub geo_fail_open: bool,
    pub ip_quota: RateQuota,
    pub cid_quota: RateQuota,
    pub retry_after_secs: u64,
    pub rate_lock_timeout: Duration,
    pub timestamp_window_secs: u64,
    pub trusted_proxies: Vec<IpNet>,
    pub registry: RegistrySettings,
    pub platform_suffix: String,
    pub frame_ancestors: String,
    pub debug_errors: bool,
    pub log_filter: String,
}

impl GateConfig {
    /// Load configuration from the process environment, falling back to compiled defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary lookup; values missing there come from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = defaults_map()?;
        let source = Source { lookup, defaults };

        let allowed_country = source.string("GATE_ALLOWED_COUNTRY")?;
        let allowed_country =
            crate::input_validation::normalize_country_code_iso(&allowed_country).ok_or(
                ConfigError::Invalid {
                    name: "GATE_ALLOWED_COUNTRY",
                    value: allowed_country,
                },
            )?;

        let geo_source_raw = source.string("GATE_GEO_SOURCE")?;
        let geo_source =
            parse_geo_source(&geo_source_raw).ok_or(ConfigError::Invalid {
                name: "GATE_GEO_SOURCE",
                value: geo_source_raw,
            })?;

        let registry = RegistrySettings {
            pg_address: source.string("GATE_REGISTRY_PG_ADDRESS")?,
            timeout: Duration::from_millis(source.u64("GATE_REGISTRY_TIMEOUT_MS")?),
            integration_type: source.i32("GATE_REGISTRY_INTEGRATION_TYPE")?,
            active_status: source.i32("GATE_REGISTRY_ACTIVE_STATUS")?,
        };

        Ok(GateConfig {
            allowed_country,
            geo_source,
            geo_header: source.string("GATE_GEO_HEADER")?.to_ascii_lowercase(),
            geo_cidr_table: source.string("GATE_GEO_CIDR_TABLE")?,
            geo_fail_open: source.bool("GATE_GEO_FAIL_OPEN")?,
            ip_quota: RateQuota {
                limit: source.u32("GATE_IP_RATE_LIMIT")?,
                window_secs: source.window("GATE_IP_RATE_WINDOW_SECS")?,
            },
            cid_quota: RateQuota {
                limit: source.u32("GATE_CID_RATE_LIMIT")?,
                window_secs: source.window("GATE_CID_RATE_WINDOW_SECS")?,
            },
            retry_after_secs: source.u64("GATE_RATE_RETRY_AFTER_SECS")?,
            rate_lock_timeout: Duration::from_millis(source.u64("GATE_RATE_LOCK_TIMEOUT_MS")?),
            timestamp_window_secs: source.u64("GATE_TIMESTAMP_WINDOW_SECS")?,
            trusted_proxies: source.cidr_list("GATE_TRUSTED_PROXY_CIDRS")?,
            registry,
            platform_suffix: source.string("GATE_PLATFORM_SUFFIX")?.to_ascii_lowercase(),
            frame_ancestors: source.string("GATE_FRAME_ANCESTORS")?,
            debug_errors: source.bool("GATE_DEBUG_ERRORS")?,
            log_filter: source.string("GATE_LOG_FILTER")?,
        })
    }
}

/// Compiled defaults only, for tests and tooling.
pub fn defaults() -> Result<GateConfig, ConfigError> {
    GateConfig::from_lookup(|_| None)
}

struct Source<'a, F> {
    lookup: F,
    defaults: &'a HashMap<String, String>,
}

impl<F> Source<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &'static str) -> Result<String, ConfigError> {
        if let Some(value) = (self.lookup)(name) {
            return Ok(value.trim().to_string());
        }
        self.defaults
            .get(name)
            .cloned()
            .ok_or(ConfigError::Missing(name))
    }

    fn parsed<T: std::str::FromStr>(&self, name: &'static str) -> Result<T, ConfigError> {
        let value = self.string(name)?;
        value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { name, value })
    }

    fn u64(&self, name: &'static str) -> Result<u64, ConfigError> {
        self.parsed(name)
    }

    fn u32(&self, name: &'static str) -> Result<u32, ConfigError> {
        self.parsed(name)
    }

    fn i32(&self, name: &'static str) -> Result<i32, ConfigError> {
        self.parsed(name)
    }

    fn window(&self, name: &'static str) -> Result<u64, ConfigError> {
        match self.u64(name)? {
            0 => Err(ConfigError::Invalid {
                name,
                value: "0".to_string(),
            }),
            secs => Ok(secs),
        }
    }

    fn bool(&self, name: &'static str) -> Result<bool, ConfigError> {
        let value = self.string(name)?;
        parse_bool_like(&value).ok_or(ConfigError::Invalid { name, value })
    }

    fn cidr_list(&self, name: &'static str) -> Result<Vec<IpNet>, ConfigError> {
        let value = self.string(name)?;
        parse_cidr_list(&value).ok_or(ConfigError::Invalid { name, value })
    }
}

static DEFAULTS_MAP: Lazy<Result<HashMap<String, String>, String>> =
    Lazy::new(|| parse_defaults_env_map(DEFAULTS_ENV_TEXT));

fn defaults_map() -> Result<&'static HashMap<String, String>, ConfigError> {
    DEFAULTS_MAP
        .as_ref()
        .map_err(|msg| ConfigError::Defaults(msg.clone()))
}

fn parse_defaults_env_map(input: &str) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();
    for (index, raw_line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("Invalid defaults line {}: missing '='", line_no))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid defaults line {}: empty key", line_no));
        }
        map.insert(key.to_string(), value.trim().to_string());
    }
    Ok(map)
}

pub(crate) fn parse_bool_like(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_geo_source(value: &str) -> Option<GeoSource> {
    match value.trim().to_ascii_lowercase().as_str() {
        "edge_header" => Some(GeoSource::EdgeHeader),
        "cidr_table" => Some(GeoSource::CidrTable),
        _ => None,
    }
}

/// Comma-separated CIDRs; a bare address is taken as a single-host network.
pub(crate) fn parse_cidr_list(value: &str) -> Option<Vec<IpNet>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<IpNet>()
                .ok()
                .or_else(|| item.parse::<std::net::IpAddr>().ok().map(IpNet::from))
        })
        .collect()
}
