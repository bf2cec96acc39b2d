//! Work server module.
//!
//! Hands jobs to clients over HTTP, verifies who completes them and
//! persists the results.

pub mod routes;
mod sink;
mod validators;
mod work_server;

pub use routes::{build_router, serve_on, serve_with_shutdown, AppState};
pub use sink::{check_relative, DiskSaver, FanoutSink, ResultSink, SaveOutcome};
pub use validators::{
    decode_body, has_errors, parse_client_id, validate_client_id, validate_directory,
    PutResultsRequest,
};
pub use work_server::{
    WorkServer, ATTACHMENTS_SAVED, JOB_COMPLETED, JOB_COMPLETED_NO_ATTACHMENTS,
};
