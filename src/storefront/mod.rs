// src/storefront/mod.rs
// Storefront identity: registry lookup and domain binding for a client identifier.

use serde::Serialize;

pub mod domain;
pub mod registry;
pub mod validator;

pub use domain::{normalize_domain, strip_platform_suffix};
pub use registry::{BoundedRegistry, PgRegistry};
pub use validator::{DomainMatch, StorefrontValidator, ValidationFailure, ValidationOutcome};

/// One active merchant integration as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorefrontRecord {
    /// Human-entered storefront URL or domain; not guaranteed well-formed.
    pub name: String,
    pub client_id: String,
    pub integration_type: i32,
    pub active_status: i32,
}
