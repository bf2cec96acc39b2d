//! Job module for work distribution
//!
//! Jobs are the unit of work distribution in reg-harvester.
//! Each job names one upstream URL to fetch.

mod types;

pub use types::{ClientId, Job, JobType};
