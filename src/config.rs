use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the media pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote recorder (SFTP) settings
    pub remote: RemoteConfig,

    /// Transfer engine settings
    pub transfer: TransferConfig,

    /// Session grouping settings
    pub grouping: GroupingConfig,

    /// External encoder settings
    pub encoder: EncoderConfig,

    /// Catalog server settings
    pub catalog: CatalogConfig,

    /// Stats generation settings
    pub stats: StatsConfig,

    /// Local directory layout
    pub library: LibraryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Host name of the recording NAS
    pub host: String,

    /// SSH port
    pub port: u16,

    /// SSH user
    pub username: String,

    /// Optional identity file; key/agent auth is assumed otherwise
    pub identity_file: Option<PathBuf>,

    /// Directory on the remote holding one folder per recording source
    pub root_path: String,

    /// Seconds a file must sit unmodified before it counts as flushed
    pub staleness_secs: u64,
}

impl RemoteConfig {
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Fixed chunk size in bytes
    pub chunk_size: u64,

    /// In-flight chunk requests when no folder is still recording
    pub base_concurrency: usize,

    /// Minimum milliseconds between progress renders
    pub progress_interval_ms: u64,
}

impl TransferConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Maximum silence between segments of one session, in seconds
    pub gap_tolerance_secs: u64,
}

impl GroupingConfig {
    pub fn gap_tolerance(&self) -> Duration {
        Duration::from_secs(self.gap_tolerance_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// ffmpeg binary
    pub ffmpeg_bin: String,

    /// ffprobe binary
    pub ffprobe_bin: String,

    /// Hardware acceleration method, e.g. "cuda"; None runs in software
    pub hwaccel: Option<String>,

    /// Video codec for per-segment transcodes
    pub video_codec: String,

    /// Audio codec for per-segment transcodes
    pub audio_codec: String,

    /// Extra arguments appended to every transcode invocation
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// GraphQL endpoint of the catalog server
    pub endpoint: String,

    /// Studio assigned to recorded scenes when none is set yet
    pub default_studio_id: String,

    /// Studio assigned to export posts
    pub export_studio_id: String,

    /// Parent tag for per-post tags
    pub export_parent_tag_id: String,

    /// Delay before the first job poll after requesting a scan, in ms
    pub settle_delay_ms: u64,

    /// Interval between job queue polls, in ms
    pub poll_interval_ms: u64,

    /// Poll attempts before giving up on the queue draining
    pub max_poll_attempts: u32,

    /// Page size for search queries
    pub page_size: u32,
}

impl CatalogConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Directory holding stats.csv and stats.md
    pub dir: PathBuf,

    /// Day span of the rolling window
    pub window_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Local mirror of the remote recording tree (raw pulls land here)
    pub staging_dir: PathBuf,

    /// Root under which per-page output folders are created
    pub output_root: PathBuf,

    /// Root of downloaded social-media export folders
    pub export_dir: PathBuf,
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_paths = [
            "recpipe.toml",
            "config/recpipe.toml",
            "~/.config/recpipe/config.toml",
            "/etc/recpipe/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("loaded configuration from {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to defaults with environment overrides
        Self::from_env()
    }

    /// Build configuration from defaults plus environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("RECPIPE_REMOTE_HOST") {
            config.remote.host = host;
        }

        if let Ok(user) = std::env::var("RECPIPE_REMOTE_USER") {
            config.remote.username = user;
        }

        if let Ok(root) = std::env::var("RECPIPE_REMOTE_ROOT") {
            config.remote.root_path = root;
        }

        if let Ok(endpoint) = std::env::var("RECPIPE_CATALOG_ENDPOINT") {
            config.catalog.endpoint = endpoint;
        }

        if let Ok(concurrency) = std::env::var("RECPIPE_CONCURRENCY") {
            config.transfer.base_concurrency =
                concurrency.parse().unwrap_or(config.transfer.base_concurrency);
        }

        if let Ok(staging) = std::env::var("RECPIPE_STAGING_DIR") {
            config.library.staging_dir = PathBuf::from(staging);
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("configuration saved to {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.remote.host.is_empty() {
            return Err(anyhow!("remote.host must not be empty"));
        }

        if self.transfer.chunk_size == 0 {
            return Err(anyhow!("transfer.chunk_size must be greater than 0"));
        }

        if self.transfer.base_concurrency == 0 {
            return Err(anyhow!("transfer.base_concurrency must be greater than 0"));
        }

        if self.grouping.gap_tolerance_secs == 0 {
            return Err(anyhow!("grouping.gap_tolerance_secs must be greater than 0"));
        }

        url::Url::parse(&self.catalog.endpoint)
            .map_err(|e| anyhow!("catalog.endpoint is not a valid URL: {}", e))?;

        if self.catalog.max_poll_attempts == 0 {
            return Err(anyhow!("catalog.max_poll_attempts must be greater than 0"));
        }

        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "recpipe configuration:\n\
            - Remote: {}@{}:{} {}\n\
            - Chunk size: {} bytes, base concurrency: {}\n\
            - Gap tolerance: {}s\n\
            - Encoder: {} ({}/{})\n\
            - Catalog: {}\n\
            - Staging: {}",
            self.remote.username,
            self.remote.host,
            self.remote.port,
            self.remote.root_path,
            self.transfer.chunk_size,
            self.transfer.base_concurrency,
            self.grouping.gap_tolerance_secs,
            self.encoder.ffmpeg_bin,
            self.encoder.video_codec,
            self.encoder.audio_codec,
            self.catalog.endpoint,
            self.library.staging_dir.display(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig {
                host: "pi.hole".to_string(),
                port: 22,
                username: "pi".to_string(),
                identity_file: None,
                root_path: "/media/pi/rec/rec".to_string(),
                staleness_secs: 300, // 5 minutes of quiet means the writer is done
            },
            transfer: TransferConfig {
                chunk_size: 1024 * 1024,
                base_concurrency: (num_cpus::get() * 2).clamp(4, 12),
                progress_interval_ms: 20,
            },
            grouping: GroupingConfig {
                gap_tolerance_secs: 15 * 60,
            },
            encoder: EncoderConfig {
                ffmpeg_bin: "ffmpeg".to_string(),
                ffprobe_bin: "ffprobe".to_string(),
                hwaccel: Some("cuda".to_string()),
                video_codec: "h264_nvenc".to_string(),
                audio_codec: "aac".to_string(),
                extra_args: vec!["-cpu-used".to_string(), "5".to_string()],
            },
            catalog: CatalogConfig {
                endpoint: "http://localhost:9999/graphql".to_string(),
                default_studio_id: "2".to_string(),
                export_studio_id: "104".to_string(),
                export_parent_tag_id: "2239".to_string(),
                settle_delay_ms: 2000,
                poll_interval_ms: 1000,
                max_poll_attempts: 600,
                page_size: 25,
            },
            stats: StatsConfig {
                dir: PathBuf::from("./stats"),
                window_days: 35,
            },
            library: LibraryConfig {
                staging_dir: PathBuf::from("./ts"),
                output_root: PathBuf::from("."),
                export_dir: PathBuf::from("./instagram"),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
        self.config.remote.host = host.into();
        self
    }

    pub fn with_remote_root(mut self, root: impl Into<String>) -> Self {
        self.config.remote.root_path = root.into();
        self
    }

    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.config.transfer.chunk_size = bytes;
        self
    }

    pub fn with_base_concurrency(mut self, concurrency: usize) -> Self {
        self.config.transfer.base_concurrency = concurrency;
        self
    }

    pub fn with_gap_tolerance_secs(mut self, secs: u64) -> Self {
        self.config.grouping.gap_tolerance_secs = secs;
        self
    }

    pub fn with_catalog_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.catalog.endpoint = endpoint.into();
        self
    }

    pub fn with_staging_dir(mut self, dir: PathBuf) -> Self {
        self.config.library.staging_dir = dir;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
