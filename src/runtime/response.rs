// src/runtime/response.rs
// Every outward response is built here so the framing headers are never missed.

use spin_sdk::http::Response;

use crate::input_validation::escape_html;
use crate::runtime::policy_pipeline::RejectReason;
use crate::runtime::request_context::StorefrontForm;
use crate::storefront::{StorefrontRecord, ValidationFailure};

pub const DEFAULT_FRAME_ANCESTORS: &str = "*";

/// Embedding policy attached to each response.
#[derive(Debug, Clone, Copy)]
pub struct Framing<'a> {
    pub frame_ancestors: &'a str,
}

impl Default for Framing<'_> {
    fn default() -> Self {
        Self {
            frame_ancestors: DEFAULT_FRAME_ANCESTORS,
        }
    }
}

pub fn framed_response(
    framing: Framing<'_>,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, String)],
    body: impl Into<Vec<u8>>,
) -> Response {
    let mut builder = Response::builder();
    builder
        .status(status)
        .header(
            "Content-Security-Policy",
            format!("frame-ancestors {}", framing.frame_ancestors),
        )
        .header("X-Frame-Options", "ALLOWALL");
    if !content_type.is_empty() {
        builder.header("Content-Type", content_type);
    }
    for (name, value) in extra_headers {
        builder.header(*name, value.as_str());
    }
    builder.body(body.into()).build()
}

fn plain_text(framing: Framing<'_>, status: u16, extra: &[(&str, String)], body: String) -> Response {
    framed_response(framing, status, "text/plain; charset=utf-8", extra, body)
}

pub fn rejection_response(
    framing: Framing<'_>,
    reason: &RejectReason,
    retry_after_secs: u64,
) -> Response {
    match reason {
        RejectReason::MethodNotAllowed => framed_response(
            framing,
            reason.status(),
            "",
            &[("Allow", "POST".to_string())],
            Vec::new(),
        ),
        RejectReason::RateLimited => plain_text(
            framing,
            reason.status(),
            &[("Retry-After", retry_after_secs.to_string())],
            reason.body(),
        ),
        _ => plain_text(framing, reason.status(), &[], reason.body()),
    }
}

/// Validation failures look identical to the client unless debug detail is enabled.
pub fn validation_failure_response(
    framing: Framing<'_>,
    failure: &ValidationFailure,
    debug_errors: bool,
) -> Response {
    let body = match failure {
        ValidationFailure::Registry(err) if debug_errors => format!("Access denied: {}", err),
        _ if debug_errors => format!("Access denied: {}", failure.as_str()),
        _ => "Access denied".to_string(),
    };
    plain_text(framing, 403, &[], body)
}

pub fn internal_error_response(framing: Framing<'_>, detail: Option<&str>) -> Response {
    let body = match detail {
        Some(detail) => format!("Internal Server Error: {}", detail),
        None => "Internal Server Error".to_string(),
    };
    plain_text(framing, 500, &[], body)
}

pub fn success_response(
    framing: Framing<'_>,
    record: &StorefrontRecord,
    form: &StorefrontForm,
) -> Response {
    let rows = [
        ("Storefront", record.name.as_str()),
        ("Product ID", form.product_id.as_str()),
        ("Product Title", form.product_title.as_str()),
        ("Product Price", form.product_price.as_str()),
        ("Product Variant ID", form.product_variant_id.as_str()),
        ("Shop Domain", form.shop_domain.as_str()),
        ("CID", form.cid.as_str()),
    ];
    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Storefront Gate</title></head><body>\n<dl>\n",
    );
    for (label, value) in rows {
        html.push_str(&format!("<dt>{}</dt><dd>{}</dd>\n", label, escape_html(value)));
    }
    html.push_str("</dl>\n</body></html>\n");
    framed_response(
        framing,
        200,
        "text/html; charset=utf-8",
        &[("Cache-Control", "no-store".to_string())],
        html,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RegistryError;
    use crate::test_support::{body_text, header_value, storefront_record};

    fn assert_framed(resp: &Response) {
        assert_eq!(
            header_value(resp, "content-security-policy").as_deref(),
            Some("frame-ancestors *")
        );
        assert_eq!(
            header_value(resp, "x-frame-options").as_deref(),
            Some("ALLOWALL")
        );
    }

    #[test]
    fn every_constructor_attaches_framing_headers() {
        let framing = Framing::default();
        let form = StorefrontForm::default();
        let responses = [
            rejection_response(framing, &RejectReason::MethodNotAllowed, 60),
            rejection_response(framing, &RejectReason::RateLimited, 60),
            rejection_response(framing, &RejectReason::MissingFields(vec!["cid"]), 60),
            validation_failure_response(framing, &ValidationFailure::DomainMismatch, false),
            internal_error_response(framing, None),
            success_response(framing, &storefront_record("shop.myshopify.com", "c"), &form),
        ];
        for resp in &responses {
            assert_framed(resp);
        }
    }

    #[test]
    fn method_not_allowed_has_empty_body() {
        let resp = rejection_response(Framing::default(), &RejectReason::MethodNotAllowed, 60);
        assert_eq!(*resp.status(), 405);
        assert!(resp.body().is_empty());
        assert_eq!(header_value(&resp, "allow").as_deref(), Some("POST"));
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let resp = rejection_response(Framing::default(), &RejectReason::RateLimited, 60);
        assert_eq!(*resp.status(), 429);
        assert_eq!(header_value(&resp, "retry-after").as_deref(), Some("60"));
        assert_eq!(body_text(&resp), "Too many requests");

        let other = rejection_response(Framing::default(), &RejectReason::Bot, 60);
        assert_eq!(header_value(&other, "retry-after"), None);
    }

    #[test]
    fn registry_detail_is_hidden_unless_debugging() {
        let failure = ValidationFailure::Registry(RegistryError::Timeout(2000));
        let quiet = validation_failure_response(Framing::default(), &failure, false);
        assert_eq!(*quiet.status(), 403);
        assert_eq!(body_text(&quiet), "Access denied");

        let loud = validation_failure_response(Framing::default(), &failure, true);
        assert_eq!(body_text(&loud), "Access denied: registry lookup exceeded 2000 ms");
    }

    #[test]
    fn success_page_escapes_untrusted_fields() {
        let form = StorefrontForm {
            product_title: "<script>alert(1)</script>".to_string(),
            shop_domain: "\"shop\"".to_string(),
            ..StorefrontForm::default()
        };
        let resp = success_response(
            Framing::default(),
            &storefront_record("shop.myshopify.com", "cid-1"),
            &form,
        );
        let body = body_text(&resp);
        assert_eq!(*resp.status(), 200);
        assert_eq!(header_value(&resp, "cache-control").as_deref(), Some("no-store"));
        assert!(body.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(body.contains("&quot;shop&quot;"));
        assert!(!body.contains("<script>"));
    }

    #[test]
    fn configured_frame_ancestors_are_used() {
        let framing = Framing {
            frame_ancestors: "https://*.myshopify.com",
        };
        let resp = internal_error_response(framing, Some("config"));
        assert_eq!(
            header_value(&resp, "content-security-policy").as_deref(),
            Some("frame-ancestors https://*.myshopify.com")
        );
        assert_eq!(body_text(&resp), "Internal Server Error: config");
    }
}
