use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

pub const MAX_FORM_BYTES: usize = 64 * 1024;
pub const MAX_FIELD_LEN: usize = 2048;

static ISO_ALPHA2: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX",
        "AZ", "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ",
        "BR", "BS", "BT", "BV", "BW", "BY", "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK",
        "CL", "CM", "CN", "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM",
        "DO", "DZ", "EC", "EE", "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK", "FM", "FO", "FR",
        "GA", "GB", "GD", "GE", "GF", "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS",
        "GT", "GU", "GW", "GY", "HK", "HM", "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN",
        "IO", "IQ", "IR", "IS", "IT", "JE", "JM", "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN",
        "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC", "LI", "LK", "LR", "LS", "LT", "LU", "LV",
        "LY", "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK", "ML", "MM", "MN", "MO", "MP", "MQ",
        "MR", "MS", "MT", "MU", "MV", "MW", "MX", "MY", "MZ", "NA", "NC", "NE", "NF", "NG", "NI",
        "NL", "NO", "NP", "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG", "PH", "PK", "PL", "PM",
        "PN", "PR", "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW", "SA", "SB", "SC",
        "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS", "ST", "SV",
        "SX", "SY", "SZ", "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO", "TR",
        "TT", "TV", "TW", "TZ", "UA", "UG", "UM", "US", "UY", "UZ", "VA", "VC", "VE", "VG", "VI",
        "VN", "VU", "WF", "WS", "YE", "YT", "ZA", "ZM", "ZW",
    ]
    .into_iter()
    .collect()
});

pub fn normalize_country_code_iso(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.len() != 2 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let upper = trimmed.to_ascii_uppercase();
    if ISO_ALPHA2.contains(upper.as_str()) {
        Some(upper)
    } else {
        None
    }
}

pub fn parse_ip_addr(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<IpAddr>().ok().map(|addr| addr.to_string())
}

/// Decoded form fields. Repeated names keep the first value.
pub type FormFields = HashMap<String, String>;

/// Decode a form body according to its content type. Oversized or unsupported bodies decode to
/// an empty field set; the admission pipeline decides what that means.
pub fn parse_form_body(content_type: &str, body: &[u8]) -> FormFields {
    if body.len() > MAX_FORM_BYTES {
        return FormFields::new();
    }
    let lowered = content_type.to_ascii_lowercase();
    if lowered.contains("application/x-www-form-urlencoded") {
        return parse_urlencoded(&String::from_utf8_lossy(body));
    }
    if lowered.contains("multipart/form-data") {
        if let Some(boundary) = multipart_boundary(content_type) {
            return parse_multipart(body, &boundary);
        }
    }
    FormFields::new()
}

pub fn parse_urlencoded(input: &str) -> FormFields {
    let mut fields = FormFields::new();
    for pair in input.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(raw_key);
        if key.is_empty() {
            continue;
        }
        fields
            .entry(key)
            .or_insert_with(|| clamp_field(decode_component(raw_value)));
    }
    fields
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().to_string()
}

pub fn multipart_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    })
}

/// Text parts of a multipart/form-data body. File parts are skipped.
pub fn parse_multipart(body: &[u8], boundary: &str) -> FormFields {
    let mut fields = FormFields::new();
    let text = String::from_utf8_lossy(body);
    let delimiter = format!("--{}", boundary);
    for part in text.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break;
        }
        let part = part.strip_prefix("\r\n").unwrap_or(part);
        let Some((headers, value)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let Some(name) = disposition_name(headers) else {
            continue;
        };
        let value = value.strip_suffix("\r\n").unwrap_or(value);
        fields
            .entry(name)
            .or_insert_with(|| clamp_field(value.to_string()));
    }
    fields
}

fn disposition_name(headers: &str) -> Option<String> {
    let disposition = headers.lines().find(|line| {
        line.to_ascii_lowercase()
            .starts_with("content-disposition:")
    })?;
    let mut name = None;
    for param in disposition.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" => return None,
            "name" => name = Some(value.trim().trim_matches('"').to_string()),
            _ => {}
        }
    }
    name.filter(|n| !n.is_empty())
}

fn clamp_field(mut value: String) -> String {
    if value.len() > MAX_FIELD_LEN {
        let mut cut = MAX_FIELD_LEN;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        value.truncate(cut);
    }
    value
}

/// Unix seconds from an untrusted field; anything unparseable is 0.
pub fn parse_unix_ts(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}
