// Registry clients: the Postgres-backed storefront registry and a deadline wrapper around any
// registry implementation.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use spin_sdk::pg::{self, Decode, ParameterValue};
use tracing::{debug, warn};

use super::StorefrontRecord;
use crate::config::RegistrySettings;
use crate::providers::{RegistryError, StorefrontRegistry};

const FIND_ACTIVE_SQL: &str = "SELECT name, unicid, type::int4, dsk_status::int4 \
     FROM calculators \
     WHERE unicid = $1 AND type = $2 AND dsk_status = $3 \
     LIMIT 1";

/// Storefront registry in Postgres, reached through the Spin outbound Postgres interface.
/// A connection is opened per lookup; the host pools the underlying sockets.
///
/// With a timeout set, the server enforces it: the connection string carries
/// `connect_timeout` and each session runs `SET statement_timeout` before the lookup.
#[derive(Debug, Clone)]
pub struct PgRegistry {
    address: String,
    integration_type: i32,
    active_status: i32,
    timeout: Option<Duration>,
}

impl PgRegistry {
    pub fn new(address: impl Into<String>, integration_type: i32, active_status: i32) -> Self {
        Self {
            address: address.into(),
            integration_type,
            active_status,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn from_settings(settings: &RegistrySettings) -> Self {
        Self::new(
            settings.pg_address.clone(),
            settings.integration_type,
            settings.active_status,
        )
        .with_timeout(settings.timeout)
    }

    /// Address handed to the host, with `connect_timeout` added unless the operator set one.
    pub fn connection_address(&self) -> String {
        let address = self.address.trim();
        let Some(timeout) = self.timeout else {
            return address.to_string();
        };
        if address.contains("connect_timeout") {
            return address.to_string();
        }
        // whole seconds, never below one
        let secs = timeout.as_millis().div_ceil(1000).max(1);
        if address.contains("://") {
            let separator = if address.contains('?') { '&' } else { '?' };
            format!("{}{}connect_timeout={}", address, separator, secs)
        } else {
            format!("{} connect_timeout={}", address, secs)
        }
    }

    /// Session setting issued before the lookup query.
    pub fn statement_timeout_sql(&self) -> Option<String> {
        self.timeout
            .map(|timeout| format!("SET statement_timeout = {}", timeout.as_millis().max(1)))
    }
}

impl StorefrontRegistry for PgRegistry {
    fn find_active(&self, client_id: &str) -> Result<Option<StorefrontRecord>, RegistryError> {
        if self.address.trim().is_empty() {
            return Err(RegistryError::NotConfigured);
        }
        let conn = pg::Connection::open(&self.connection_address())
            .map_err(|e| RegistryError::Connection(format!("{:?}", e)))?;
        if let Some(sql) = self.statement_timeout_sql() {
            conn.execute(&sql, &[])
                .map_err(|e| RegistryError::Query(format!("{:?}", e)))?;
        }
        let params = [
            ParameterValue::Str(client_id.to_string()),
            ParameterValue::Int32(self.integration_type),
            ParameterValue::Int32(self.active_status),
        ];
        let rowset = conn
            .query(FIND_ACTIVE_SQL, &params)
            .map_err(|e| RegistryError::Query(format!("{:?}", e)))?;

        let Some(row) = rowset.rows.first() else {
            return Ok(None);
        };
        if row.len() < 4 {
            return Err(RegistryError::Decode(format!(
                "expected 4 columns, got {}",
                row.len()
            )));
        }
        let decode_err = |e: pg::Error| RegistryError::Decode(format!("{:?}", e));
        Ok(Some(StorefrontRecord {
            name: String::decode(&row[0]).map_err(decode_err)?,
            client_id: String::decode(&row[1]).map_err(decode_err)?,
            integration_type: i32::decode(&row[2]).map_err(decode_err)?,
            active_status: i32::decode(&row[3]).map_err(decode_err)?,
        }))
    }
}

/// Bounds any registry lookup by a deadline; an overrun is reported as `RegistryError::Timeout`.
///
/// The lookup runs on a worker thread when the target supports threads. Where it does not
/// (wasm32-wasip1), the lookup runs inline and an overrun is detected once it returns, so the
/// inner registry has to bound its own wait (`PgRegistry::with_timeout`).
pub struct BoundedRegistry<R> {
    inner: Arc<R>,
    timeout: Duration,
}

impl<R> BoundedRegistry<R>
where
    R: StorefrontRegistry + Send + Sync + 'static,
{
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }

    fn run_inline(&self, client_id: &str) -> Result<Option<StorefrontRecord>, RegistryError> {
        let started = Instant::now();
        let result = self.inner.find_active(client_id);
        if started.elapsed() > self.timeout {
            warn!(
                timeout_ms = self.timeout.as_millis() as u64,
                "registry lookup overran its deadline"
            );
            return Err(RegistryError::Timeout(self.timeout.as_millis()));
        }
        result
    }
}

impl<R> StorefrontRegistry for BoundedRegistry<R>
where
    R: StorefrontRegistry + Send + Sync + 'static,
{
    fn find_active(&self, client_id: &str) -> Result<Option<StorefrontRecord>, RegistryError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned_id = client_id.to_string();
        let spawned = thread::Builder::new()
            .name("registry-lookup".to_string())
            .spawn(move || {
                // receiver may be gone after a timeout
                let _ = tx.send(inner.find_active(&owned_id));
            });

        if let Err(err) = spawned {
            debug!(error = %err, "registry lookup running inline");
            return self.run_inline(client_id);
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "registry lookup timed out"
                );
                Err(RegistryError::Timeout(self.timeout.as_millis()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(RegistryError::Query(
                "registry lookup worker exited without a result".to_string(),
            )),
        }
    }
}
