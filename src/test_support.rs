use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use spin_sdk::http::{Method, Request, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::providers::{
    Clock, KeyValueStore, RegistryError, StoreError, StorefrontRegistry,
};
use crate::runtime::request_context::{RequestContext, StorefrontForm};
use crate::storefront::StorefrontRecord;

#[derive(Default)]
pub(crate) struct InMemoryStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self
            .map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut map = self
            .map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Store whose every operation fails, as when the host KV backend is down.
pub(crate) struct UnavailableStore;

impl KeyValueStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError("backend down".to_string()))
    }

    fn set(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
        Err(StoreError("backend down".to_string()))
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone)]
pub(crate) struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub(crate) fn new(now: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    pub(crate) fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Registry holding at most one record, or failing every lookup.
pub(crate) struct StaticRegistry {
    result: Result<Option<StorefrontRecord>, RegistryError>,
}

impl StaticRegistry {
    pub(crate) fn with(record: StorefrontRecord) -> Self {
        Self {
            result: Ok(Some(record)),
        }
    }

    pub(crate) fn empty() -> Self {
        Self { result: Ok(None) }
    }

    pub(crate) fn failing(err: RegistryError) -> Self {
        Self { result: Err(err) }
    }
}

impl StorefrontRegistry for StaticRegistry {
    fn find_active(&self, client_id: &str) -> Result<Option<StorefrontRecord>, RegistryError> {
        match &self.result {
            Ok(Some(record)) if record.client_id == client_id => Ok(Some(record.clone())),
            Ok(_) => Ok(None),
            Err(err) => Err(err.clone()),
        }
    }
}

pub(crate) fn storefront_record(name: &str, client_id: &str) -> StorefrontRecord {
    StorefrontRecord {
        name: name.to_string(),
        client_id: client_id.to_string(),
        integration_type: 13,
        active_status: 1,
    }
}

/// Context that passes every admission check at `now` for a client in BG.
pub(crate) fn admissible_context(now: u64) -> RequestContext {
    RequestContext {
        method: "POST".to_string(),
        direct_secure: true,
        forwarded_proto: None,
        port: Some(443),
        content_type: "application/x-www-form-urlencoded".to_string(),
        origin: "https://shop.myshopify.com".to_string(),
        referer: String::new(),
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/126.0 Safari/537.36"
            .to_string(),
        client_ip: "203.0.113.7".to_string(),
        form: StorefrontForm {
            cid: "cid-1".to_string(),
            product_id: "42".to_string(),
            product_title: "Sofa".to_string(),
            product_price: "1299.00".to_string(),
            product_variant_id: "7".to_string(),
            shop_domain: "shop".to_string(),
            shop_permanent_domain: "shop.myshopify.com".to_string(),
            ts: now as i64,
        },
    }
}

/// Builder for Spin requests shaped like the storefront widget's form post.
pub(crate) struct TestRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    fields: Vec<(String, String)>,
}

impl TestRequest {
    /// Admissible post from a trusted proxy that forwards a BG client.
    pub(crate) fn admissible(now: u64) -> Self {
        Self {
            method: Method::Post,
            url: "https://gate.example/".to_string(),
            headers: vec![
                ("spin-client-addr".into(), "127.0.0.1:51000".into()),
                ("spin-full-url".into(), "https://gate.example/".into()),
                ("x-forwarded-for".into(), "203.0.113.7".into()),
                ("x-geo-country".into(), "BG".into()),
                (
                    "content-type".into(),
                    "application/x-www-form-urlencoded".into(),
                ),
                ("origin".into(), "https://shop.myshopify.com".into()),
                (
                    "user-agent".into(),
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) Safari/605.1.15".into(),
                ),
            ],
            fields: vec![
                ("cid".into(), "cid-1".into()),
                ("product_id".into(), "42".into()),
                ("product_title".into(), "Sofa <Deluxe>".into()),
                ("product_price".into(), "1299.00".into()),
                ("product_variant_id".into(), "7".into()),
                ("shop_domain".into(), "shop".into()),
                ("shop_permanent_domain".into(), "shop.myshopify.com".into()),
                ("ts".into(), now.to_string()),
            ],
        }
    }

    pub(crate) fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub(crate) fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn without_header(mut self, name: &str) -> Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self
    }

    pub(crate) fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.retain(|(k, _)| k != name);
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn without_field(mut self, name: &str) -> Self {
        self.fields.retain(|(k, _)| k != name);
        self
    }

    pub(crate) fn build(self) -> Request {
        let body = urlencode(&self.fields);
        let mut builder = Request::builder();
        builder.method(self.method).uri(self.url.as_str());
        for (key, value) in &self.headers {
            builder.header(key.as_str(), value.as_str());
        }
        builder.body(body.into_bytes());
        builder.build()
    }
}

pub(crate) fn urlencode(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, NON_ALPHANUMERIC),
                utf8_percent_encode(v, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub(crate) fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn request_with_headers(path: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = Request::builder();
    builder.method(Method::Post).uri(path);
    for (key, value) in headers {
        builder.header(*key, *value);
    }
    builder.build()
}

pub(crate) fn header_value(resp: &Response, name: &str) -> Option<String> {
    resp.headers()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_str().map(str::to_string))
}

pub(crate) fn body_text(resp: &Response) -> String {
    String::from_utf8_lossy(resp.body()).to_string()
}
