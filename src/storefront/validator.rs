// Binds a client identifier to the storefront domain it was registered for.

use tracing::{debug, info, warn};

use super::domain::{has_platform_suffix, normalize_domain, strip_platform_suffix};
use super::StorefrontRecord;
use crate::providers::{RegistryError, StorefrontRegistry};

/// Which equivalence rule matched the stored domain to a request domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainMatch {
    /// Normalized stored domain equals a normalized candidate.
    Exact,
    /// Equal once the platform suffix is stripped from stored and candidates alike.
    SuffixStripped,
    /// Stored domain has the suffix; stripped stored equals a bare candidate.
    StoredSuffixOnly,
}

impl DomainMatch {
    pub fn as_str(self) -> &'static str {
        match self {
            DomainMatch::Exact => "exact",
            DomainMatch::SuffixStripped => "suffix_stripped",
            DomainMatch::StoredSuffixOnly => "stored_suffix_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    UnknownClient,
    DomainMismatch,
    Registry(RegistryError),
}

impl ValidationFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationFailure::UnknownClient => "unknown_client",
            ValidationFailure::DomainMismatch => "domain_mismatch",
            ValidationFailure::Registry(_) => "registry_error",
        }
    }
}

pub type ValidationOutcome = Result<(StorefrontRecord, DomainMatch), ValidationFailure>;

pub struct StorefrontValidator<'a> {
    registry: &'a dyn StorefrontRegistry,
    platform_suffix: &'a str,
}

impl<'a> StorefrontValidator<'a> {
    pub fn new(registry: &'a dyn StorefrontRegistry, platform_suffix: &'a str) -> Self {
        Self {
            registry,
            platform_suffix,
        }
    }

    /// Look up `client_id` and require its registered domain to match one of the candidates.
    pub fn validate(
        &self,
        client_id: &str,
        primary_domain: &str,
        permanent_domain: &str,
    ) -> ValidationOutcome {
        let record = match self.registry.find_active(client_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(client_id, "no active storefront registered for client");
                return Err(ValidationFailure::UnknownClient);
            }
            Err(err) => {
                warn!(client_id, error = %err, "storefront registry lookup failed");
                return Err(ValidationFailure::Registry(err));
            }
        };

        match match_domains(
            &record.name,
            primary_domain,
            permanent_domain,
            self.platform_suffix,
        ) {
            Some(rule) => {
                debug!(client_id, rule = rule.as_str(), "storefront domain matched");
                Ok((record, rule))
            }
            None => {
                info!(
                    client_id,
                    stored = %record.name,
                    primary_domain,
                    permanent_domain,
                    "storefront domain mismatch"
                );
                Err(ValidationFailure::DomainMismatch)
            }
        }
    }
}

/// Three-tier domain equivalence, tried in order.
///
/// A bare candidate against a stored platform subdomain already compares equal once every side
/// is suffix-stripped, so the one-sided rule is reported from the same comparison.
pub fn match_domains(
    stored: &str,
    primary: &str,
    permanent: &str,
    suffix: &str,
) -> Option<DomainMatch> {
    let stored = normalize_domain(stored);
    if stored.is_empty() {
        return None;
    }
    let candidates = [normalize_domain(primary), normalize_domain(permanent)];

    if candidates.iter().any(|candidate| *candidate == stored) {
        return Some(DomainMatch::Exact);
    }

    let stored_base = strip_platform_suffix(&stored, suffix);
    if stored_base.is_empty() {
        return None;
    }
    let stored_has_suffix = has_platform_suffix(&stored, suffix);
    candidates.iter().find_map(|candidate| {
        if strip_platform_suffix(candidate, suffix) != stored_base {
            return None;
        }
        if stored_has_suffix && !has_platform_suffix(candidate, suffix) {
            Some(DomainMatch::StoredSuffixOnly)
        } else {
            Some(DomainMatch::SuffixStripped)
        }
    })
}
