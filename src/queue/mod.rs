//! Job queue and statistics
//!
//! All state lives in the shared store so that generators, the work
//! server and `status` can run as separate processes.

mod job_queue;
mod statistics;

pub use job_queue::{
    normalize_timestamp, timestamp_key, waiting_counter_key, JobQueue, QueueStats,
    CLIENT_JOBS_KEY, DEFAULT_TIMESTAMP, INVALID_JOBS_KEY, JOBS_IN_PROGRESS_KEY,
    JOBS_WAITING_QUEUE_KEY, LAST_JOB_ID_KEY, TOTAL_CLIENT_IDS_KEY,
};
pub use statistics::{done_counter_key, JobStatistics, JobsDone, SystemStatus};
