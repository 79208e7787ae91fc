// src/signals/ip_identity.rs
// Client address and transport resolution behind trusted proxies

use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;
use spin_sdk::http::Request;

/// Header Spin sets to the peer socket address.
pub const CLIENT_ADDR_HEADER: &str = "spin-client-addr";
/// Header Spin sets to the full request URL as seen by the host.
pub const FULL_URL_HEADER: &str = "spin-full-url";

pub const SECURE_PORT: u16 = 443;

/// Scheme and port of the connection as seen by this component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportInfo {
    pub direct_secure: bool,
    pub port: Option<u16>,
}

/// Peer address without the port, as reported by the host.
pub fn peer_ip(req: &Request) -> Option<IpAddr> {
    let raw = header_str(req, CLIENT_ADDR_HEADER)?.trim();
    raw.parse::<SocketAddr>()
        .map(|addr| addr.ip())
        .ok()
        .or_else(|| raw.parse::<IpAddr>().ok())
}

/// True when the direct peer sits inside one of the trusted proxy networks.
pub fn forwarded_headers_trusted(req: &Request, trusted: &[IpNet]) -> bool {
    match peer_ip(req) {
        Some(ip) => trusted.iter().any(|net| net.contains(&ip)),
        None => false,
    }
}

/// Best available client IP: forwarded headers when the peer is trusted, else the peer itself.
pub fn extract_client_ip(req: &Request, headers_trusted: bool) -> String {
    if headers_trusted {
        if let Some(forwarded) = header_str(req, "x-forwarded-for") {
            // Take the first IP in the list
            if let Some(ip) = forwarded.split(',').next().and_then(parse_ip) {
                return ip;
            }
        }
        if let Some(ip) = header_str(req, "x-real-ip").and_then(parse_ip) {
            return ip;
        }
    }
    peer_ip(req)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// `X-Forwarded-Proto`, only when forwarded headers are trusted.
pub fn forwarded_proto(req: &Request, headers_trusted: bool) -> Option<String> {
    if !headers_trusted {
        return None;
    }
    header_str(req, "x-forwarded-proto")
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

/// Scheme and port from the host-provided full URL.
pub fn transport_info(req: &Request) -> TransportInfo {
    let Some(url) = header_str(req, FULL_URL_HEADER) else {
        return TransportInfo::default();
    };
    parse_transport(url)
}

pub(crate) fn parse_transport(url: &str) -> TransportInfo {
    let url = url.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return TransportInfo::default();
    };
    let scheme = scheme.to_ascii_lowercase();
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let explicit_port = if host_port.starts_with('[') {
        host_port
            .split_once("]:")
            .and_then(|(_, port)| port.parse::<u16>().ok())
    } else {
        host_port
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse::<u16>().ok())
    };
    let port = explicit_port.or(match scheme.as_str() {
        "https" => Some(SECURE_PORT),
        "http" => Some(80),
        _ => None,
    });
    TransportInfo {
        direct_secure: scheme == "https",
        port,
    }
}

fn parse_ip(value: &str) -> Option<String> {
    crate::input_validation::parse_ip_addr(value)
}

fn header_str<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.header(name).and_then(|value| value.as_str())
}
