// src/signals/geo/mod.rs
// Country allow-listing for the storefront gate.
// The country of a client IP comes from an injected `CountryLookup`; two lookups ship here:
// a trusted edge header (e.g. X-Geo-Country) and a static CIDR table.

use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;
use spin_sdk::http::Request;
use thiserror::Error;

use crate::providers::CountryLookup;

/// Outcome of classifying one client IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoAssessment {
    pub country: Option<String>,
    pub allowed: bool,
}

/// Single-country gate over a `CountryOf(ip)` capability.
pub struct GeoResolver<'a> {
    lookup: &'a dyn CountryLookup,
    allowed_country: &'a str,
    fail_open: bool,
}

impl<'a> GeoResolver<'a> {
    /// `fail_open` decides unclassifiable addresses; the gate ships with it off.
    pub fn new(lookup: &'a dyn CountryLookup, allowed_country: &'a str, fail_open: bool) -> Self {
        Self {
            lookup,
            allowed_country,
            fail_open,
        }
    }

    pub fn assess(&self, ip: &str) -> GeoAssessment {
        let country = self.lookup.country_of(ip).and_then(|c| normalize_country_code(&c));
        let allowed = match country.as_deref() {
            Some(code) => code.eq_ignore_ascii_case(self.allowed_country),
            None => self.fail_open,
        };
        GeoAssessment { country, allowed }
    }

    pub fn is_allowed_country(&self, ip: &str) -> bool {
        self.assess(ip).allowed
    }
}

/// Normalize a country code to two-letter uppercase ISO form.
pub fn normalize_country_code(value: &str) -> Option<String> {
    crate::input_validation::normalize_country_code_iso(value)
}

/// Extract and normalize country code from a trusted edge header.
/// Returns None when forwarded headers are not trusted for this request.
pub fn extract_geo_country(req: &Request, header: &str, headers_trusted: bool) -> Option<String> {
    if !headers_trusted {
        return None;
    }
    req.header(header)
        .and_then(|value| value.as_str())
        .map(str::trim)
        .and_then(normalize_country_code)
}

/// Country reported by the edge for the client of the current request only.
#[derive(Debug, Clone, Default)]
pub struct EdgeHeaderCountry {
    ip: String,
    country: Option<String>,
}

impl EdgeHeaderCountry {
    pub fn new(ip: impl Into<String>, country: Option<String>) -> Self {
        Self {
            ip: ip.into(),
            country,
        }
    }

    pub fn from_request(req: &Request, header: &str, headers_trusted: bool, ip: &str) -> Self {
        Self::new(ip, extract_geo_country(req, header, headers_trusted))
    }
}

impl CountryLookup for EdgeHeaderCountry {
    fn country_of(&self, ip: &str) -> Option<String> {
        if ip != self.ip {
            return None;
        }
        self.country.clone()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeoTableError {
    #[error("country table is not valid JSON: {0}")]
    Json(String),
    #[error("invalid country code {0:?} in country table")]
    Country(String),
    #[error("invalid network {0:?} in country table")]
    Network(String),
}

/// Static CIDR to country table. The most specific matching network wins.
#[derive(Debug, Clone, Default)]
pub struct CidrCountryTable {
    entries: Vec<(IpNet, String)>,
}

impl CidrCountryTable {
    /// Parse `{"BG": ["185.4.0.0/16", ...], ...}`.
    pub fn from_json(text: &str) -> Result<Self, GeoTableError> {
        let raw: HashMap<String, Vec<String>> =
            serde_json::from_str(text).map_err(|e| GeoTableError::Json(e.to_string()))?;
        let mut entries = Vec::new();
        for (country, networks) in raw {
            let code =
                normalize_country_code(&country).ok_or_else(|| GeoTableError::Country(country))?;
            for network in networks {
                let net = network
                    .trim()
                    .parse::<IpNet>()
                    .map_err(|_| GeoTableError::Network(network.clone()))?;
                entries.push((net.trunc(), code.clone()));
            }
        }
        entries.sort_by(|a, b| b.0.prefix_len().cmp(&a.0.prefix_len()));
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CountryLookup for CidrCountryTable {
    fn country_of(&self, ip: &str) -> Option<String> {
        let addr = ip.trim().parse::<IpAddr>().ok()?;
        self.entries
            .iter()
            .find(|(net, _)| net.contains(&addr))
            .map(|(_, code)| code.clone())
    }
}
