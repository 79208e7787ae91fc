// src/lib.rs
// Entry point for the storefront admission gate Spin app

use once_cell::sync::OnceCell;
use spin_sdk::http::{Request, Response};
use spin_sdk::key_value::Store;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

pub mod config;           // GATE_* settings and compiled defaults
pub mod enforcement;      // Fixed-window counters and the rate limiter
pub mod input_validation; // Form decoding and untrusted-input helpers
pub mod providers;        // Capability traits the gate is composed from
pub mod runtime;          // Request context, admission pipeline, routing, responses
pub mod signals;          // Bot, geo and client identity signals
pub mod storefront;       // Registry lookup and domain binding
#[cfg(test)]
mod test_support;

use config::{GateConfig, GeoSource};
use enforcement::counter_store::{KvCounterStore, UnavailableCounterStore};
use providers::{BotClassifier, Clock, CounterStore, StorefrontRegistry, SystemClock};
use runtime::response::{internal_error_response, Framing};
use signals::browser::PatternBotClassifier;
use signals::geo::CidrCountryTable;
use storefront::{BoundedRegistry, PgRegistry};

static TRACING: OnceCell<()> = OnceCell::new();

/// Install the fmt subscriber once per process. Later calls, or an already installed global
/// subscriber, are ignored.
pub fn init_tracing(filter: &str) {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// Country source selected by configuration.
pub enum GeoProvider {
    /// Trusted edge header, bound to the client IP of each request.
    EdgeHeader,
    Table(CidrCountryTable),
}

impl GeoProvider {
    /// An unreadable table degrades to an empty one, so every address is unknown to it.
    pub fn from_config(cfg: &GateConfig) -> Self {
        debug!(source = cfg.geo_source.as_str(), "country source selected");
        match cfg.geo_source {
            GeoSource::EdgeHeader => GeoProvider::EdgeHeader,
            GeoSource::CidrTable => match CidrCountryTable::from_json(&cfg.geo_cidr_table) {
                Ok(table) => GeoProvider::Table(table),
                Err(err) => {
                    error!(error = %err, "country table rejected; no address will resolve");
                    GeoProvider::Table(CidrCountryTable::default())
                }
            },
        }
    }
}

/// Composition root: configuration plus every capability the request flow depends on.
pub struct Gate {
    pub cfg: GateConfig,
    pub counters: Box<dyn CounterStore>,
    pub registry: Box<dyn StorefrontRegistry>,
    pub classifier: Box<dyn BotClassifier>,
    pub geo: GeoProvider,
    pub clock: Box<dyn Clock>,
}

impl Gate {
    /// Gate backed by host services: the default Spin key-value store and outbound Postgres.
    pub fn from_host(cfg: GateConfig) -> Self {
        let counters: Box<dyn CounterStore> = match Store::open_default() {
            Ok(store) => Box::new(KvCounterStore::new(store, cfg.rate_lock_timeout)),
            Err(err) => {
                warn!(error = ?err, "key-value store unavailable; rate limiting fails open");
                Box::new(UnavailableCounterStore)
            }
        };
        let registry = BoundedRegistry::new(
            PgRegistry::from_settings(&cfg.registry),
            cfg.registry.timeout,
        );
        Self {
            geo: GeoProvider::from_config(&cfg),
            counters,
            registry: Box::new(registry),
            classifier: Box::new(PatternBotClassifier),
            clock: Box::new(SystemClock),
            cfg,
        }
    }
}

/// Run one request through admission and storefront validation.
pub fn handle_gate_request(gate: &Gate, req: &Request) -> Response {
    runtime::request_router::route_request(gate, req)
}

#[cfg_attr(target_arch = "wasm32", spin_sdk::http_component)]
pub fn spin_entrypoint(req: Request) -> Response {
    let cfg = match GateConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            init_tracing("info");
            error!(error = %err, "invalid gate configuration");
            return internal_error_response(Framing::default(), None);
        }
    };
    init_tracing(&cfg.log_filter);
    let gate = Gate::from_host(cfg);
    handle_gate_request(&gate, &req)
}
