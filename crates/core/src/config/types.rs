use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub youtube: YoutubeConfig,
    #[serde(default)]
    pub credentials: CredentialPoolConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Where run, job and credential state lives.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// SQLite file shared by every worker process.
    #[default]
    Sqlite,
    /// Process-local state, lost on restart.
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tubeid.db")
}

/// YouTube Data API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct YoutubeConfig {
    /// API keys rotated by the credential pool.
    #[serde(default)]
    pub api_credentials: Vec<String>,
    /// API base URL (default: https://www.googleapis.com/youtube/v3)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 10)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            api_credentials: Vec::new(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_timeout() -> u32 {
    10
}

/// Credential pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialPoolConfig {
    /// Consecutive transient failures after which a credential is disabled.
    #[serde(default = "default_disable_threshold")]
    pub consecutive_failure_disable_threshold: u32,
}

impl Default for CredentialPoolConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_disable_threshold: default_disable_threshold(),
        }
    }
}

fn default_disable_threshold() -> u32 {
    3
}

/// Channel resolver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Retries of a lookup after a transient API failure.
    #[serde(default = "default_max_api_retries")]
    pub max_api_retries: u32,
    /// First backoff delay (milliseconds). Doubles on every retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay (milliseconds).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Immediate re-attempts with a fresh credential after a quota error.
    #[serde(default = "default_quota_rotations")]
    pub quota_rotations: u32,
    /// API lookups allowed per second for a single owner.
    #[serde(default = "default_owner_rps")]
    pub owner_requests_per_second: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_api_retries: default_max_api_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            quota_rotations: default_quota_rotations(),
            owner_requests_per_second: default_owner_rps(),
        }
    }
}

fn default_max_api_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_quota_rotations() -> u32 {
    1
}

fn default_owner_rps() -> u32 {
    5
}

/// Job execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Attempts a job gets before a retriable failure becomes FAILED.
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_job: u32,
    /// Concurrent workers in the local worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// A job stuck in PROCESSING longer than this is requeued on startup.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Interval of the sweep that finalizes runs whose jobs are all terminal.
    #[serde(default = "default_finalize_sweep")]
    pub finalize_sweep_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_job: default_max_attempts(),
            workers: default_workers(),
            stale_after_secs: default_stale_after(),
            finalize_sweep_secs: default_finalize_sweep(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_workers() -> usize {
    4
}

fn default_stale_after() -> u64 {
    300
}

fn default_finalize_sweep() -> u64 {
    30
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub youtube: SanitizedYoutubeConfig,
    pub credentials: CredentialPoolConfig,
    pub resolver: ResolverConfig,
    pub jobs: JobsConfig,
}

/// Sanitized YouTube config (keys hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedYoutubeConfig {
    pub api_credentials_configured: usize,
    pub base_url: String,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            youtube: SanitizedYoutubeConfig {
                api_credentials_configured: config.youtube.api_credentials.len(),
                base_url: config.youtube.base_url.clone(),
                timeout_secs: config.youtube.timeout_secs,
            },
            credentials: config.credentials.clone(),
            resolver: config.resolver.clone(),
            jobs: config.jobs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let toml = r#"
[youtube]
api_credentials = ["key-a", "key-b"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.youtube.api_credentials, vec!["key-a", "key-b"]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.backend, StoreBackend::Sqlite);
        assert_eq!(config.database.path.to_str().unwrap(), "tubeid.db");
        assert_eq!(config.youtube.timeout_secs, 10);
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.credentials.consecutive_failure_disable_threshold, 3);
        assert_eq!(config.resolver.max_api_retries, 3);
        assert_eq!(config.resolver.backoff_base_ms, 500);
        assert_eq!(config.resolver.backoff_max_ms, 30_000);
        assert_eq!(config.resolver.quota_rotations, 1);
        assert_eq!(config.jobs.max_attempts_per_job, 3);
        assert_eq!(config.jobs.workers, 4);
        assert_eq!(config.jobs.finalize_sweep_secs, 30);
        assert!(config.youtube.api_credentials.is_empty());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
backend = "memory"

[youtube]
api_credentials = ["k1"]
base_url = "http://localhost:9999"
timeout_secs = 2

[credentials]
consecutive_failure_disable_threshold = 5

[resolver]
max_api_retries = 1
backoff_base_ms = 10
backoff_max_ms = 100
quota_rotations = 2
owner_requests_per_second = 50

[jobs]
max_attempts_per_job = 4
workers = 8
stale_after_secs = 60
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert_eq!(config.youtube.base_url, "http://localhost:9999");
        assert_eq!(config.credentials.consecutive_failure_disable_threshold, 5);
        assert_eq!(config.resolver.quota_rotations, 2);
        assert_eq!(config.resolver.owner_requests_per_second, 50);
        assert_eq!(config.jobs.max_attempts_per_job, 4);
        assert_eq!(config.jobs.workers, 8);
        assert_eq!(config.jobs.stale_after_secs, 60);
    }

    #[test]
    fn test_sanitized_config_hides_keys() {
        let mut config = Config::default();
        config.youtube.api_credentials = vec!["secret-1".to_string(), "secret-2".to_string()];

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.youtube.api_credentials_configured, 2);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-1"));
        assert!(!json.contains("secret-2"));
    }
}
