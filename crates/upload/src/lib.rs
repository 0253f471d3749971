//! Upload service.
//!
//! A separate process with deliberately narrow reach: its own object
//! store credentials, a local malware scanner socket, and HTTPS to the
//! core's `/internal/uploads/*` endpoints. It never touches the main
//! data store or the transit vault directly — a compromise here leaks
//! nothing it was not already handed.

pub mod core_api;
pub mod detect;
pub mod error;
pub mod images;
pub mod pdf;
pub mod pipeline;
pub mod routes;
pub mod scan;

pub use {
    core_api::{CoreApi, HttpCoreApi},
    detect::{AiDetection, AiDetector, NoopDetector},
    error::{Result, UploadError},
    pipeline::{UploadResponse, UploadService},
    scan::{ClamdScanner, CleanScanner, MalwareScanner, ScanVerdict},
};
