//! Static configuration loaded once at startup.
//! These settings affect server binding or require restart to change.

use serde::Deserialize;
use std::path::PathBuf;

/// Static configuration loaded from `config.*` and `GUICHET__*` environment
/// variables at startup
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_extraction")]
    pub extraction: ExtractionConfig,

    #[serde(default = "default_queue")]
    pub queue: QueueConfig,

    #[serde(default = "default_upload")]
    pub upload: UploadConfig,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            storage: default_storage(),
            extraction: default_extraction(),
            queue: default_queue(),
            upload: default_upload(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the database file and the filesystem object store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Vision extraction backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_base_url")]
    pub base_url: String,

    #[serde(default = "default_extraction_model")]
    pub model: String,

    /// Upper bound on a single extraction call. A call that exceeds this is
    /// aborted and treated as an extraction failure.
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
}

/// Job queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent worker tasks pulling from the queue
    #[serde(default = "default_queue_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How long a claimed job stays leased before it is presumed crashed and
    /// redelivered. Must outlast the extraction timeout or healthy runs get
    /// redelivered mid-flight.
    #[serde(default = "default_queue_lease_secs")]
    pub lease_secs: u64,

    /// Total delivery budget per job; exhaustion parks the job dead
    #[serde(default = "default_queue_max_deliveries")]
    pub max_deliveries: u32,
}

/// Upload limits
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_max_bytes")]
    pub max_bytes: u64,
}

// ==================== Default Value Functions ====================

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    8080
}

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

pub(crate) fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

pub(crate) fn default_extraction() -> ExtractionConfig {
    ExtractionConfig {
        base_url: default_extraction_base_url(),
        model: default_extraction_model(),
        timeout_secs: default_extraction_timeout_secs(),
    }
}

pub(crate) fn default_extraction_base_url() -> String {
    "http://localhost:11434".to_string()
}

pub(crate) fn default_extraction_model() -> String {
    "llama3.2-vision".to_string()
}

pub(crate) fn default_extraction_timeout_secs() -> u64 {
    120
}

pub(crate) fn default_queue() -> QueueConfig {
    QueueConfig {
        workers: default_queue_workers(),
        poll_interval_secs: default_queue_poll_interval_secs(),
        lease_secs: default_queue_lease_secs(),
        max_deliveries: default_queue_max_deliveries(),
    }
}

pub(crate) fn default_queue_workers() -> usize {
    2
}

pub(crate) fn default_queue_poll_interval_secs() -> u64 {
    2
}

pub(crate) fn default_queue_lease_secs() -> u64 {
    180
}

pub(crate) fn default_queue_max_deliveries() -> u32 {
    3
}

pub(crate) fn default_upload() -> UploadConfig {
    UploadConfig {
        max_bytes: default_upload_max_bytes(),
    }
}

pub(crate) fn default_upload_max_bytes() -> u64 {
    20 * 1024 * 1024
}
