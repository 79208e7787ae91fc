// src/runtime/request_context.rs
// Immutable per-request view consumed by the admission pipeline and the validator.

use ipnet::IpNet;
use spin_sdk::http::{Method, Request};

use crate::input_validation::{parse_form_body, parse_unix_ts, FormFields};
use crate::signals::ip_identity;

/// Widget form fields as posted by the storefront; every value is untrusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorefrontForm {
    pub cid: String,
    pub product_id: String,
    pub product_title: String,
    pub product_price: String,
    pub product_variant_id: String,
    pub shop_domain: String,
    pub shop_permanent_domain: String,
    /// Unix seconds; 0 when absent or unparseable.
    pub ts: i64,
}

impl StorefrontForm {
    pub fn from_fields(fields: &FormFields) -> Self {
        let text = |name: &str| fields.get(name).cloned().unwrap_or_default();
        Self {
            cid: text("cid"),
            product_id: text("product_id"),
            product_title: text("product_title"),
            product_price: text("product_price"),
            product_variant_id: text("product_variant_id"),
            shop_domain: text("shop_domain"),
            shop_permanent_domain: text("shop_permanent_domain"),
            ts: parse_unix_ts(fields.get("ts").map(String::as_str)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Upper-case method name.
    pub method: String,
    pub direct_secure: bool,
    /// `X-Forwarded-Proto`, present only when the peer is a trusted proxy.
    pub forwarded_proto: Option<String>,
    pub port: Option<u16>,
    pub content_type: String,
    pub origin: String,
    pub referer: String,
    pub user_agent: String,
    pub client_ip: String,
    pub form: StorefrontForm,
}

impl RequestContext {
    pub fn from_request(req: &Request, trusted_proxies: &[IpNet]) -> Self {
        let trusted = ip_identity::forwarded_headers_trusted(req, trusted_proxies);
        let transport = ip_identity::transport_info(req);
        let content_type = header_text(req, "content-type");
        // the body is only worth decoding for a post
        let form = if *req.method() == Method::Post {
            StorefrontForm::from_fields(&parse_form_body(&content_type, req.body()))
        } else {
            StorefrontForm::default()
        };

        Self {
            method: method_name(req.method()),
            direct_secure: transport.direct_secure,
            forwarded_proto: ip_identity::forwarded_proto(req, trusted),
            port: transport.port,
            content_type,
            origin: header_text(req, "origin"),
            referer: header_text(req, "referer"),
            user_agent: header_text(req, "user-agent"),
            client_ip: ip_identity::extract_client_ip(req, trusted),
            form,
        }
    }

    pub fn is_post(&self) -> bool {
        self.method == "POST"
    }
}

pub fn method_name(method: &Method) -> String {
    match method {
        Method::Get => "GET".to_string(),
        Method::Head => "HEAD".to_string(),
        Method::Post => "POST".to_string(),
        Method::Put => "PUT".to_string(),
        Method::Patch => "PATCH".to_string(),
        Method::Delete => "DELETE".to_string(),
        Method::Options => "OPTIONS".to_string(),
        _ => "OTHER".to_string(),
    }
}

fn header_text(req: &Request, name: &str) -> String {
    req.header(name)
        .and_then(|value| value.as_str())
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRequest;
    use spin_sdk::http::Method;

    fn loopback() -> Vec<IpNet> {
        vec!["127.0.0.1/32".parse().unwrap()]
    }

    #[test]
    fn context_reads_headers_transport_and_form() {
        let req = TestRequest::admissible(1_700_000_000).build();
        let ctx = RequestContext::from_request(&req, &loopback());
        assert!(ctx.is_post());
        assert!(ctx.direct_secure);
        assert_eq!(ctx.port, Some(443));
        assert_eq!(ctx.client_ip, "203.0.113.7");
        assert_eq!(ctx.origin, "https://shop.myshopify.com");
        assert!(ctx.referer.is_empty());
        assert_eq!(ctx.form.cid, "cid-1");
        assert_eq!(ctx.form.product_title, "Sofa <Deluxe>");
        assert_eq!(ctx.form.shop_permanent_domain, "shop.myshopify.com");
        assert_eq!(ctx.form.ts, 1_700_000_000);
    }

    #[test]
    fn untrusted_peer_cannot_spoof_ip_or_proto() {
        let req = TestRequest::admissible(1)
            .header("spin-client-addr", "198.51.100.9:4000")
            .header("spin-full-url", "http://gate.example/")
            .header("x-forwarded-proto", "https")
            .build();
        let ctx = RequestContext::from_request(&req, &loopback());
        assert_eq!(ctx.client_ip, "198.51.100.9");
        assert_eq!(ctx.forwarded_proto, None);
        assert!(!ctx.direct_secure);
        assert_eq!(ctx.port, Some(80));
    }

    #[test]
    fn bad_timestamp_becomes_zero() {
        let req = TestRequest::admissible(1).field("ts", "soon").build();
        let ctx = RequestContext::from_request(&req, &loopback());
        assert_eq!(ctx.form.ts, 0);

        let req = TestRequest::admissible(1).without_field("ts").build();
        let ctx = RequestContext::from_request(&req, &loopback());
        assert_eq!(ctx.form.ts, 0);
    }

    #[test]
    fn non_post_body_is_not_decoded() {
        let req = TestRequest::admissible(1).method(Method::Put).build();
        let ctx = RequestContext::from_request(&req, &loopback());
        assert_eq!(ctx.method, "PUT");
        assert_eq!(ctx.form, StorefrontForm::default());
    }
}
