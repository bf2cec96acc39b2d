//! Client worker
//!
//! The process that does the upstream fetching: one [`WorkClient`] per API
//! key, any number of them per work server.

mod worker;

pub use worker::{
    attachment_files, parse_job, AttachmentFile, ClientResult, JobOutcome, WorkClient,
    WorkerStats, SERVER_TIMEOUT,
};
