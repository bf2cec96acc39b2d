//! reg-harvester - Distributed regulations.gov harvester
//!
//! Harvests dockets, documents, comments and their attachments from the
//! regulations.gov v4 API with a fleet of independent workers, each
//! bound by its own API key's hourly quota.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  search pages   ┌──────────────────────────┐
//! │  regulations.gov │ ──────────────▶ │      WorkGenerator       │
//! │      v4 API      │                 │  SearchIterator → dedup  │
//! └────────┬─────────┘                 └────────────┬─────────────┘
//!          │                                        │ add_job
//!          │ fetch job URL                          ▼
//!          │                           ┌──────────────────────────┐
//!          │                           │          Redis           │
//!          │                           │  jobs_waiting_queue      │
//!          │                           │  jobs_in_progress        │
//!          │                           │  client_jobs / counters  │
//!          │                           └────────────┬─────────────┘
//!          │                                        │
//!          ▼                                        ▼
//! ┌──────────────────┐   GET /get_job  ┌──────────────────────────┐
//! │   WorkClient     │ ◀─────────────▶ │        WorkServer        │
//! │  (one per key)   │ PUT /put_results│  ownership + persistence │
//! └──────────────────┘                 └────────────┬─────────────┘
//!                                                   │
//!                                                   ▼
//!                                      data/{agency}/{docket}/...
//! ```
//!
//! Every piece of shared state lives in the [`store::KeyValueStore`], so the
//! generator, server, clients and `status` can run as separate processes.
//!
//! # Example
//!
//! ```bash
//! reg-harvester serve --data-dir /data
//! reg-harvester generate --api-key $API_KEY --data-dir /data
//! reg-harvester work --server http://localhost:8080 --api-key $API_KEY
//! reg-harvester validate --api-key $API_KEY --data-dir /data --output unfound_jobs.json
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod generator;
pub mod job;
pub mod paths;
pub mod queue;
pub mod search;
pub mod server;
pub mod store;

pub use client::{WorkClient, WorkerStats};
pub use config::{
    CliArgs, ClientConfig, Command, GeneratorConfig, ServerConfig, ValidatorConfig,
};
pub use error::{HarvestError, Result};
pub use generator::{ValidationReport, Validator, WorkGenerator};
pub use job::{ClientId, Job, JobType};
pub use paths::PathGenerator;
pub use queue::{JobQueue, JobStatistics, SystemStatus};
pub use server::WorkServer;
pub use store::{KeyValueStore, MemoryStore, RedisStore};
