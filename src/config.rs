//! Configuration types for reg-harvester
//!
//! Defines CLI arguments and the validated runtime configuration for each
//! process: work server, work generator, client worker and validator.

use crate::error::ConfigError;
use crate::generator::{DEFAULT_INTERVAL, ENDPOINTS};
use crate::store::RedisStoreConfig;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pause between client polls; matches the upstream rate limit
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3600);

/// Distributed regulations.gov harvester
#[derive(Parser, Debug, Clone)]
#[command(
    name = "reg-harvester",
    version,
    about = "Distributed harvester for regulations.gov dockets, documents and comments",
    long_about = "Harvests public regulatory records with a fleet of independent workers.\n\n\
                  Runs as three cooperating processes sharing one Redis:\n\
                  1. generate: searches regulations.gov and queues new entities\n\
                  2. serve: hands jobs to workers and stores their results\n\
                  3. work: fetches jobs from the server and downloads them",
    after_help = "EXAMPLES:\n    \
        # Run the work server, writing results under /data\n    \
        reg-harvester serve --data-dir /data --redis redis://localhost:6379\n\n    \
        # Queue everything modified since the last run, once\n    \
        reg-harvester generate --api-key $API_KEY --data-dir /data --once\n\n    \
        # Start a worker\n    \
        reg-harvester work --server http://localhost:8080 --api-key $API_KEY\n\n    \
        # Check queue status\n    \
        reg-harvester status --redis redis://localhost:6379\n\n    \
        # List comments regulations.gov has that /data does not\n    \
        reg-harvester validate --api-key $API_KEY --data-dir /data --endpoint comments"
)]
pub struct CliArgs {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,

    /// Redis URL for the shared store
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379", global = true)]
    pub redis: String,

    /// Quiet mode - only warnings and errors
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the work server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0", value_name = "ADDR")]
        bind: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8080", value_name = "PORT")]
        port: u16,

        /// Root directory for harvested results
        #[arg(long, env = "DATA_DIR", default_value = ".", value_name = "DIR")]
        data_dir: PathBuf,

        /// Additional directory receiving a copy of every result (can be repeated)
        #[arg(long = "mirror", value_name = "DIR", action = clap::ArgAction::Append)]
        mirror_dirs: Vec<PathBuf>,
    },

    /// Search regulations.gov and queue new jobs
    Generate {
        /// regulations.gov API key
        #[arg(long, env = "API_KEY", hide_env_values = true, value_name = "KEY")]
        api_key: String,

        /// Root directory of harvested results, used to skip known entities
        #[arg(long, env = "DATA_DIR", default_value = ".", value_name = "DIR")]
        data_dir: PathBuf,

        /// Hours between generation rounds
        #[arg(long, default_value = "6", value_name = "HOURS")]
        interval_hours: f64,

        /// Run a single round and exit
        #[arg(long)]
        once: bool,
    },

    /// Run a client worker
    Work {
        /// Work server URL
        #[arg(long, env = "WORK_SERVER_URL", default_value = "http://localhost:8080", value_name = "URL")]
        server: String,

        /// regulations.gov API key
        #[arg(long, env = "API_KEY", hide_env_values = true, value_name = "KEY")]
        api_key: String,

        /// Client id (requested from the server if not set)
        #[arg(long, env = "ID", value_name = "ID")]
        client_id: Option<u64>,

        /// Milliseconds between jobs
        #[arg(long, default_value = "3600", value_name = "MS")]
        poll_ms: u64,

        /// Exit after N jobs (for testing)
        #[arg(long, value_name = "NUM")]
        max_jobs: Option<u64>,
    },

    /// Report entities upstream that were never harvested
    Validate {
        /// regulations.gov API key
        #[arg(long, env = "API_KEY", hide_env_values = true, value_name = "KEY")]
        api_key: String,

        /// Root directory of harvested results
        #[arg(long, env = "DATA_DIR", default_value = ".", value_name = "DIR")]
        data_dir: PathBuf,

        /// Only validate this endpoint (dockets, documents, comments)
        #[arg(long, value_name = "ENDPOINT")]
        endpoint: Option<String>,

        /// Write the missing entities as JSON to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show queue status and statistics
    Status {
        /// Watch mode - continuously update status
        #[arg(short, long)]
        watch: bool,

        /// Update interval for watch mode (seconds)
        #[arg(long, default_value = "2", value_name = "SECS")]
        interval: u64,

        /// Output format (text, json)
        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: String,
    },
}

/// Check a Redis URL and build the store config
pub fn redis_config(url: &str) -> Result<RedisStoreConfig, ConfigError> {
    let url = url.trim();
    let known_scheme = ["redis://", "rediss://", "unix://", "redis+unix://"]
        .iter()
        .any(|scheme| url.starts_with(scheme));
    if !known_scheme {
        return Err(ConfigError::InvalidRedisUrl(url.to_string()));
    }
    Ok(RedisStoreConfig::with_url(url))
}

fn require_api_key(api_key: &str) -> Result<String, ConfigError> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(ConfigError::MissingRequired(
            "API key (--api-key or API_KEY)".to_string(),
        ));
    }
    Ok(api_key.to_string())
}

fn check_data_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.exists() && !path.is_dir() {
        return Err(ConfigError::InvalidDataDir {
            path: path.to_path_buf(),
            reason: "exists and is not a directory".to_string(),
        });
    }
    Ok(path.to_path_buf())
}

/// Configuration for the work server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket to listen on
    pub addr: SocketAddr,
    /// Root for saved results
    pub data_dir: PathBuf,
    /// Extra roots receiving copies
    pub mirror_dirs: Vec<PathBuf>,
    /// Shared store
    pub redis: RedisStoreConfig,
}

impl ServerConfig {
    /// Create from CLI args
    pub fn from_serve_args(
        bind: &str,
        port: u16,
        data_dir: &Path,
        mirror_dirs: &[PathBuf],
        redis_url: &str,
    ) -> Result<Self, ConfigError> {
        let addr: SocketAddr = format!("{}:{}", bind, port).parse().map_err(
            |e: std::net::AddrParseError| ConfigError::InvalidBindAddress {
                addr: format!("{}:{}", bind, port),
                reason: e.to_string(),
            },
        )?;

        Ok(Self {
            addr,
            data_dir: check_data_dir(data_dir)?,
            mirror_dirs: mirror_dirs
                .iter()
                .map(|d| check_data_dir(d))
                .collect::<Result<Vec<_>, _>>()?,
            redis: redis_config(redis_url)?,
        })
    }
}

/// Configuration for the work generator
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// regulations.gov API key
    pub api_key: String,
    /// Root of harvested results for dedup
    pub data_dir: PathBuf,
    /// Pause between rounds
    pub interval: Duration,
    /// Single round
    pub once: bool,
    /// Shared store
    pub redis: RedisStoreConfig,
}

impl GeneratorConfig {
    /// Create from CLI args
    pub fn from_generate_args(
        api_key: &str,
        data_dir: &Path,
        interval_hours: f64,
        once: bool,
        redis_url: &str,
    ) -> Result<Self, ConfigError> {
        if !interval_hours.is_finite() || interval_hours <= 0.0 {
            return Err(ConfigError::InvalidInterval(format!(
                "{} hours (must be positive)",
                interval_hours
            )));
        }

        let interval = Duration::try_from_secs_f64(interval_hours * 3600.0).map_err(|e| {
            ConfigError::InvalidInterval(format!("{} hours ({})", interval_hours, e))
        })?;

        Ok(Self {
            api_key: require_api_key(api_key)?,
            data_dir: check_data_dir(data_dir)?,
            interval,
            once,
            redis: redis_config(redis_url)?,
        })
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            data_dir: PathBuf::from("."),
            interval: DEFAULT_INTERVAL,
            once: false,
            redis: RedisStoreConfig::default(),
        }
    }
}

/// Configuration for the validator
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// regulations.gov API key
    pub api_key: String,
    /// Root of harvested results
    pub data_dir: PathBuf,
    /// Endpoints to validate, in order
    pub endpoints: Vec<String>,
    /// Where to write the JSON report
    pub output: Option<PathBuf>,
}

impl ValidatorConfig {
    /// Create from CLI args
    pub fn from_validate_args(
        api_key: &str,
        data_dir: &Path,
        endpoint: Option<&str>,
        output: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let endpoints = match endpoint.map(str::trim) {
            Some(e) if ENDPOINTS.contains(&e) => vec![e.to_string()],
            Some(e) => return Err(ConfigError::InvalidEndpoint(e.to_string())),
            None => ENDPOINTS.iter().map(|e| e.to_string()).collect(),
        };

        Ok(Self {
            api_key: require_api_key(api_key)?,
            data_dir: check_data_dir(data_dir)?,
            endpoints,
            output: output.map(Path::to_path_buf),
        })
    }
}

/// Configuration for a client worker
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Work server base URL, no trailing slash
    pub server_url: String,
    /// regulations.gov API key
    pub api_key: String,
    /// Pre-assigned client id
    pub client_id: Option<u64>,
    /// Pause between jobs
    pub poll_interval: Duration,
    /// Stop after this many jobs
    pub max_jobs: Option<u64>,
}

impl ClientConfig {
    /// Create from CLI args
    pub fn from_work_args(
        server: &str,
        api_key: &str,
        client_id: Option<u64>,
        poll_ms: u64,
        max_jobs: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let url = reqwest::Url::parse(server.trim()).map_err(|e| ConfigError::InvalidServerUrl {
            url: server.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidServerUrl {
                url: server.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        if client_id == Some(0) {
            return Err(ConfigError::MissingRequired(
                "a client id greater than 0".to_string(),
            ));
        }

        Ok(Self {
            server_url: server.trim().trim_end_matches('/').to_string(),
            api_key: require_api_key(api_key)?,
            client_id,
            poll_interval: Duration::from_millis(poll_ms),
            max_jobs,
        })
    }
}
