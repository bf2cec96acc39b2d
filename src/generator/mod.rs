//! Work generation
//!
//! Walks each search endpoint forward from its checkpoint and enqueues a
//! job for every entity that has not been harvested yet. The validator
//! replays the same searches to find entities that never made it to disk.

mod processor;
mod storage;
mod validator;
mod work_generator;

pub use processor::{ProcessSummary, ResultsProcessor, TypeCounts};
pub use storage::{DataStorage, DiskStorage};
pub use validator::{ValidationReport, Validator, VALIDATION_START};
pub use work_generator::{WorkGenerator, DEFAULT_INTERVAL, ENDPOINTS};
