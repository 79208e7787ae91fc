// Domain canonicalization used when comparing registry domains with request domains.

/// Trim, lower-case, drop a leading `http://` or `https://`, drop trailing slashes.
///
/// The strip steps repeat until nothing changes, so inputs such as `https://shop.example//`
/// or `https:// shop.example` normalize in one call and the function is idempotent.
pub fn normalize_domain(raw: &str) -> String {
    let mut current = raw.to_lowercase();
    loop {
        let next = strip_once(&current);
        if next.len() == current.len() {
            return next.to_string();
        }
        current = next.to_string();
    }
}

fn strip_once(domain: &str) -> &str {
    let trimmed = domain.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    without_scheme.trim_end_matches('/')
}

/// Remove the platform suffix (e.g. `.myshopify.com`) from the end of a normalized domain.
pub fn strip_platform_suffix<'a>(domain: &'a str, suffix: &str) -> &'a str {
    if suffix.is_empty() {
        return domain;
    }
    domain.strip_suffix(suffix).unwrap_or(domain)
}

/// True when the normalized domain carries the platform suffix.
pub fn has_platform_suffix(domain: &str, suffix: &str) -> bool {
    !suffix.is_empty() && domain.ends_with(suffix)
}
