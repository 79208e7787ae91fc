// src/runtime/policy_pipeline.rs
// Ordered admission checks. Each `maybe_reject_*` step returns `Some` to stop the pipeline.

use tracing::info;

use crate::config::{GateConfig, CID_KEY_PREFIX, IP_KEY_PREFIX, MISSING_CID_KEY};
use crate::enforcement::rate::RateLimiter;
use crate::providers::{BotClassifier, Clock, CounterStore, CountryLookup};
use crate::runtime::request_context::RequestContext;
use crate::signals::geo::GeoResolver;

const FORM_CONTENT_TYPES: [&str; 2] = ["application/x-www-form-urlencoded", "multipart/form-data"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MethodNotAllowed,
    InsecureTransport,
    UnsupportedMediaType,
    MissingOrigin,
    Bot,
    GeoBlocked,
    RateLimited,
    InvalidTimestamp,
    /// Names of the empty required fields, in check order.
    MissingFields(Vec<&'static str>),
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MethodNotAllowed => "method_not_allowed",
            RejectReason::InsecureTransport => "insecure_transport",
            RejectReason::UnsupportedMediaType => "unsupported_media_type",
            RejectReason::MissingOrigin => "missing_origin",
            RejectReason::Bot => "bot",
            RejectReason::GeoBlocked => "geo_blocked",
            RejectReason::RateLimited => "rate_limited",
            RejectReason::InvalidTimestamp => "invalid_timestamp",
            RejectReason::MissingFields(_) => "missing_fields",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            RejectReason::MethodNotAllowed => 405,
            RejectReason::UnsupportedMediaType => 415,
            RejectReason::RateLimited => 429,
            RejectReason::MissingFields(_) => 400,
            RejectReason::InsecureTransport
            | RejectReason::MissingOrigin
            | RejectReason::Bot
            | RejectReason::GeoBlocked
            | RejectReason::InvalidTimestamp => 403,
        }
    }

    /// Plain-text body sent to the client. Bot and geo rejections share a generic message.
    pub fn body(&self) -> String {
        match self {
            RejectReason::MethodNotAllowed => String::new(),
            RejectReason::InsecureTransport => "HTTPS required".to_string(),
            RejectReason::UnsupportedMediaType => "Unsupported Media Type".to_string(),
            RejectReason::MissingOrigin => "Origin or Referer header required".to_string(),
            RejectReason::Bot | RejectReason::GeoBlocked => "Access denied".to_string(),
            RejectReason::RateLimited => "Too many requests".to_string(),
            RejectReason::InvalidTimestamp => "Invalid or expired timestamp".to_string(),
            RejectReason::MissingFields(names) => {
                format!("Missing required fields: {}", names.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Reject(RejectReason),
}

/// Capabilities one admission run needs. The geo lookup may be bound to the current request.
pub struct AdmissionPipeline<'a> {
    pub cfg: &'a GateConfig,
    pub classifier: &'a dyn BotClassifier,
    pub geo: &'a dyn CountryLookup,
    pub counters: &'a dyn CounterStore,
    pub clock: &'a dyn Clock,
}

impl AdmissionPipeline<'_> {
    /// Run every check in order; the first rejection wins and later checks never run.
    pub fn admit(&self, ctx: &RequestContext) -> Decision {
        let rejection = maybe_reject_method(ctx)
            .or_else(|| maybe_reject_insecure_transport(ctx))
            .or_else(|| maybe_reject_content_type(ctx))
            .or_else(|| maybe_reject_missing_origin(ctx))
            .or_else(|| maybe_reject_bot(ctx, self.classifier))
            .or_else(|| maybe_reject_geo(ctx, self.cfg, self.geo))
            .or_else(|| maybe_reject_rate_limit(ctx, self.cfg, self.counters, self.clock))
            .or_else(|| maybe_reject_stale_timestamp(ctx, self.cfg, self.clock))
            .or_else(|| maybe_reject_missing_fields(ctx));

        match rejection {
            Some(reason) => {
                info!(
                    reason = reason.as_str(),
                    status = reason.status(),
                    client_ip = %ctx.client_ip,
                    "request rejected"
                );
                Decision::Reject(reason)
            }
            None => Decision::Allow,
        }
    }
}

pub(crate) fn maybe_reject_method(ctx: &RequestContext) -> Option<RejectReason> {
    (!ctx.is_post()).then_some(RejectReason::MethodNotAllowed)
}

pub(crate) fn maybe_reject_insecure_transport(ctx: &RequestContext) -> Option<RejectReason> {
    let secure = ctx.direct_secure
        || ctx.forwarded_proto.as_deref() == Some("https")
        || ctx.port == Some(crate::signals::ip_identity::SECURE_PORT);
    (!secure).then_some(RejectReason::InsecureTransport)
}

pub(crate) fn maybe_reject_content_type(ctx: &RequestContext) -> Option<RejectReason> {
    let lowered = ctx.content_type.to_ascii_lowercase();
    let accepted = FORM_CONTENT_TYPES.iter().any(|ct| lowered.contains(ct));
    (!accepted).then_some(RejectReason::UnsupportedMediaType)
}

/// Presence only; the value is not compared against the storefront.
pub(crate) fn maybe_reject_missing_origin(ctx: &RequestContext) -> Option<RejectReason> {
    (ctx.origin.is_empty() && ctx.referer.is_empty()).then_some(RejectReason::MissingOrigin)
}

pub(crate) fn maybe_reject_bot(
    ctx: &RequestContext,
    classifier: &dyn BotClassifier,
) -> Option<RejectReason> {
    classifier
        .is_bot(&ctx.user_agent)
        .then_some(RejectReason::Bot)
}

pub(crate) fn maybe_reject_geo(
    ctx: &RequestContext,
    cfg: &GateConfig,
    lookup: &dyn CountryLookup,
) -> Option<RejectReason> {
    let assessment =
        GeoResolver::new(lookup, &cfg.allowed_country, cfg.geo_fail_open).assess(&ctx.client_ip);
    if assessment.allowed {
        return None;
    }
    info!(
        client_ip = %ctx.client_ip,
        country = assessment.country.as_deref().unwrap_or("unknown"),
        "geo policy block"
    );
    Some(RejectReason::GeoBlocked)
}

/// Both keys are charged before either verdict is read.
pub(crate) fn maybe_reject_rate_limit(
    ctx: &RequestContext,
    cfg: &GateConfig,
    counters: &dyn CounterStore,
    clock: &dyn Clock,
) -> Option<RejectReason> {
    let limiter = RateLimiter::new(counters, clock);
    let ip_key = format!("{}{}", IP_KEY_PREFIX, ctx.client_ip);
    let cid = if ctx.form.cid.is_empty() {
        MISSING_CID_KEY
    } else {
        ctx.form.cid.as_str()
    };
    let cid_key = format!("{}{}", CID_KEY_PREFIX, cid);

    let ip_allowed =
        limiter.check_and_increment(&ip_key, cfg.ip_quota.limit, cfg.ip_quota.window_secs);
    let cid_allowed =
        limiter.check_and_increment(&cid_key, cfg.cid_quota.limit, cfg.cid_quota.window_secs);
    (!(ip_allowed && cid_allowed)).then_some(RejectReason::RateLimited)
}

pub(crate) fn maybe_reject_stale_timestamp(
    ctx: &RequestContext,
    cfg: &GateConfig,
    clock: &dyn Clock,
) -> Option<RejectReason> {
    let ts = ctx.form.ts;
    let now = i64::try_from(clock.now_unix()).unwrap_or(i64::MAX);
    let fresh = ts != 0 && now.abs_diff(ts) <= cfg.timestamp_window_secs;
    (!fresh).then_some(RejectReason::InvalidTimestamp)
}

pub(crate) fn maybe_reject_missing_fields(ctx: &RequestContext) -> Option<RejectReason> {
    let form = &ctx.form;
    let required = [
        ("cid", &form.cid),
        ("shop_domain", &form.shop_domain),
        ("shop_permanent_domain", &form.shop_permanent_domain),
        ("product_id", &form.product_id),
    ];
    let missing: Vec<&'static str> = required
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();
    (!missing.is_empty()).then_some(RejectReason::MissingFields(missing))
}
