// src/runtime/mod.rs

pub mod policy_pipeline;
pub mod request_context;
pub mod request_router;
pub mod response;

pub use policy_pipeline::{AdmissionPipeline, Decision, RejectReason};
pub use request_context::{RequestContext, StorefrontForm};
