//! Skill execution fabric.
//!
//! Skills are declared per app in `app.yml` manifests and registered with
//! JSON-Schema tool definitions. Every callable skill takes a top-level
//! `requests: [...]` array whose elements run concurrently in one
//! invocation, each with its own id, cancel flag, and failure isolation.

pub mod error;
pub mod fabric;
pub mod http;
pub mod manifest;
pub mod registry;
pub mod sanitize;
pub mod schema;
pub mod types;

pub use {
    error::{Result, SkillError},
    fabric::{CancelProbe, ChargeHook, NeverCancelled, SkillFabric, SkillHandler},
    http::HttpSkillHandler,
    manifest::AppManifest,
    registry::SkillRegistry,
    sanitize::{PassthroughSanitizer, Sanitized, Sanitizer},
    schema::inject_request_id_field,
    types::{
        SkillContext, SkillInvocation, SkillOutcome, SkillRequest, SkillRequestId,
        SkillRequestResult, SkillSpec, SkillStage,
    },
};
