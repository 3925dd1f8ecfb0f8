use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the CCTV review client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote analysis service settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// File selection and upload settings
    #[serde(default)]
    pub upload: UploadConfig,

    /// Overlay drawing settings
    #[serde(default)]
    pub render: RenderConfig,

    /// Output and logging settings
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Analysis endpoint receiving the multipart upload
    pub endpoint: String,

    /// Bound on the whole upload + analysis round trip (seconds)
    pub request_timeout_secs: u64,

    /// TCP connect timeout (seconds)
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes
    pub max_file_size: u64,

    /// Declared media types accepted by the selection gate
    pub allowed_media_types: Vec<String>,

    /// Size of each streamed body chunk in bytes
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Box and label color (RGB)
    pub accent_color: [u8; 3],

    /// Box stroke width in pixels
    pub line_width: u32,

    /// Label font size in pixels
    pub font_size: f32,

    /// Distance between the label baseline and the top of its box
    pub label_offset: f64,

    /// TrueType font used for labels
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving rendered frames and chart data
    pub base_dir: PathBuf,

    /// Log level
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/analyze-video/".to_string(),
            request_timeout_secs: 1800, // long videos take a while server-side
            connect_timeout_secs: 10,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            allowed_media_types: vec![
                "video/mp4".to_string(),
                "video/quicktime".to_string(),
                "video/x-msvideo".to_string(),
            ],
            chunk_size: 256 * 1024,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            accent_color: [255, 0, 0],
            line_width: 2,
            font_size: 16.0,
            label_offset: 5.0,
            font_path: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./review-output"),
            log_level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            upload: UploadConfig::default(),
            render: RenderConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Load configuration from the first config file found, then the environment
    pub fn load() -> Result<Self> {
        let mut config_paths = vec![
            PathBuf::from("cctv-review.toml"),
            PathBuf::from("config/cctv-review.toml"),
        ];
        if let Some(home) = std::env::var_os("HOME") {
            config_paths.push(PathBuf::from(home).join(".config/cctv-review/config.toml"));
        }

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path.display());
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from an explicit file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config.with_env_overrides())
    }

    /// Defaults with environment variable overrides
    pub fn from_env() -> Result<Self> {
        Ok(Self::default().with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("CCTV_REVIEW_ENDPOINT") {
            self.service.endpoint = endpoint;
        }

        if let Ok(timeout) = std::env::var("CCTV_REVIEW_TIMEOUT") {
            match timeout.parse() {
                Ok(secs) => self.service.request_timeout_secs = secs,
                Err(_) => tracing::warn!("Ignoring invalid CCTV_REVIEW_TIMEOUT: {}", timeout),
            }
        }

        if let Ok(output_dir) = std::env::var("CCTV_REVIEW_OUTPUT_DIR") {
            self.output.base_dir = PathBuf::from(output_dir);
        }

        if let Ok(log_level) = std::env::var("CCTV_REVIEW_LOG_LEVEL") {
            self.output.log_level = log_level;
        }

        if let Ok(font) = std::env::var("CCTV_REVIEW_FONT") {
            self.render.font_path = Some(PathBuf::from(font));
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let endpoint = url::Url::parse(&self.service.endpoint)
            .map_err(|e| anyhow!("Invalid service endpoint {}: {}", self.service.endpoint, e))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!("Service endpoint must use http or https"));
        }

        if self.service.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be greater than 0"));
        }

        if self.upload.max_file_size == 0 {
            return Err(anyhow!("max_file_size must be greater than 0"));
        }

        if self.upload.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be greater than 0"));
        }

        if self.upload.allowed_media_types.is_empty() {
            return Err(anyhow!("allowed_media_types must not be empty"));
        }

        if self.render.line_width == 0 || self.render.font_size <= 0.0 {
            return Err(anyhow!("line_width and font_size must be positive"));
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "CCTV Review Configuration:\n\
            - Endpoint: {}\n\
            - Timeout: {}s\n\
            - Max File Size: {}MB\n\
            - Media Types: {}\n\
            - Output Directory: {}\n\
            - Label Font: {}",
            self.service.endpoint,
            self.service.request_timeout_secs,
            self.upload.max_file_size / (1024 * 1024),
            self.upload.allowed_media_types.join(", "),
            self.output.base_dir.display(),
            self.render
                .font_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "system default".to_string())
        )
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

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.service.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.config.service.request_timeout_secs = secs;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.config.upload.max_file_size = bytes;
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.config.upload.chunk_size = bytes;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.base_dir = dir;
        self
    }

    pub fn with_font(mut self, path: PathBuf) -> Self {
        self.config.render.font_path = Some(path);
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
