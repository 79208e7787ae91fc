// src/runtime/request_router.rs
// Request flow: context, admission, storefront validation, response.

use spin_sdk::http::{Request, Response};
use tracing::info;

use crate::providers::CountryLookup;
use crate::runtime::policy_pipeline::{AdmissionPipeline, Decision};
use crate::runtime::request_context::RequestContext;
use crate::runtime::response::{
    rejection_response, success_response, validation_failure_response, Framing,
};
use crate::signals::geo::EdgeHeaderCountry;
use crate::signals::ip_identity::forwarded_headers_trusted;
use crate::storefront::StorefrontValidator;
use crate::{Gate, GeoProvider};

pub(crate) fn route_request(gate: &Gate, req: &Request) -> Response {
    let cfg = &gate.cfg;
    let framing = Framing {
        frame_ancestors: &cfg.frame_ancestors,
    };
    let ctx = RequestContext::from_request(req, &cfg.trusted_proxies);

    let edge_country;
    let geo: &dyn CountryLookup = match &gate.geo {
        GeoProvider::Table(table) => table,
        GeoProvider::EdgeHeader => {
            let trusted = forwarded_headers_trusted(req, &cfg.trusted_proxies);
            edge_country =
                EdgeHeaderCountry::from_request(req, &cfg.geo_header, trusted, &ctx.client_ip);
            &edge_country
        }
    };

    let pipeline = AdmissionPipeline {
        cfg,
        classifier: gate.classifier.as_ref(),
        geo,
        counters: gate.counters.as_ref(),
        clock: gate.clock.as_ref(),
    };
    if let Decision::Reject(reason) = pipeline.admit(&ctx) {
        return rejection_response(framing, &reason, cfg.retry_after_secs);
    }

    let validator = StorefrontValidator::new(gate.registry.as_ref(), &cfg.platform_suffix);
    match validator.validate(
        &ctx.form.cid,
        &ctx.form.shop_domain,
        &ctx.form.shop_permanent_domain,
    ) {
        Ok((record, rule)) => {
            info!(
                client_id = %record.client_id,
                rule = rule.as_str(),
                client_ip = %ctx.client_ip,
                "storefront request admitted"
            );
            success_response(framing, &record, &ctx.form)
        }
        Err(failure) => {
            info!(
                reason = failure.as_str(),
                client_ip = %ctx.client_ip,
                "storefront validation failed"
            );
            validation_failure_response(framing, &failure, cfg.debug_errors)
        }
    }
}

#[cfg(test)]
mod tests;
