use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub transcribe: TranscribeConfig,
    pub research: ResearchConfig,
    pub outputs: OutputsConfig,
}

/// Control-surface configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Control endpoints require this secret when set.
    pub control_password: Option<String>,
    /// Extend the secret requirement to read endpoints.
    pub protect_reads: bool,
    pub rate_limit_per_minute: u32,
}

/// Audio ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub chunk_seconds: u32,
    pub reconnect: bool,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// 0 means unlimited reconnect attempts.
    pub max_retries: u32,
    pub stall_timeout_ms: u64,
    /// Stream extractor command. `{url}` in args is replaced with the
    /// source URL.
    pub extractor_bin: String,
    pub extractor_args: Vec<String>,
    /// Decoder command, reading encoded audio on stdin and emitting
    /// 16kHz mono s16le PCM on stdout.
    pub decoder_bin: String,
    pub decoder_args: Vec<String>,
}

/// Transcription collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscribeConfig {
    pub api_key: Option<String>,
    pub url: String,
    pub model: String,
}

/// Claim detection and evidence research configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchConfig {
    pub concurrency: usize,
    pub detection_threshold: f64,
    pub factcheck_api_key: Option<String>,
    pub fred_api_key: Option<String>,
    pub congress_api_key: Option<String>,
    pub verifier_api_key: Option<String>,
    pub verifier_url: String,
    pub verifier_model: String,
}

/// Downstream package/render/activity configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputsConfig {
    /// Remote render service endpoint. When unset, renders fall back to a
    /// local placeholder artifact.
    pub render_endpoint: Option<String>,
    pub render_timeout_ms: u64,
    pub render_attempts: u32,
    pub artifact_dir: PathBuf,
    pub activity_log: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            control_password: None,
            protect_reads: false,
            rate_limit_per_minute: defaults::RATE_LIMIT_PER_MINUTE,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: defaults::CHUNK_SECONDS,
            reconnect: true,
            retry_base_ms: defaults::INGEST_RETRY_BASE_MS,
            retry_max_ms: defaults::INGEST_RETRY_MAX_MS,
            max_retries: 0,
            stall_timeout_ms: defaults::INGEST_STALL_TIMEOUT_MS,
            extractor_bin: "yt-dlp".to_string(),
            extractor_args: vec![
                "-q".to_string(),
                "-f".to_string(),
                "bestaudio".to_string(),
                "-o".to_string(),
                "-".to_string(),
                "{url}".to_string(),
            ],
            decoder_bin: "ffmpeg".to_string(),
            decoder_args: vec![
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-i".to_string(),
                "pipe:0".to_string(),
                "-f".to_string(),
                "s16le".to_string(),
                "-ac".to_string(),
                "1".to_string(),
                "-ar".to_string(),
                "16000".to_string(),
                "pipe:1".to_string(),
            ],
        }
    }
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            model: "whisper-1".to_string(),
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::RESEARCH_CONCURRENCY,
            detection_threshold: defaults::DETECTION_THRESHOLD,
            factcheck_api_key: None,
            fred_api_key: None,
            congress_api_key: None,
            verifier_api_key: None,
            verifier_url: "https://api.openai.com/v1/chat/completions".to_string(),
            verifier_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            render_endpoint: None,
            render_timeout_ms: defaults::RENDER_TIMEOUT_MS,
            render_attempts: defaults::RENDER_ATTEMPTS,
            artifact_dir: std::env::temp_dir().join("factline-artifacts"),
            activity_log: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't
    /// exist. Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Every tunable has a `FACTLINE_*` variable; unset or empty variables
    /// leave the file value in place.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_string("FACTLINE_CONTROL_PASSWORD") {
            self.server.control_password = Some(v);
        }
        if let Some(v) = env_bool("FACTLINE_PROTECT_READS") {
            self.server.protect_reads = v;
        }
        if let Some(v) = env_parse::<u32>("FACTLINE_RATE_LIMIT_PER_MINUTE") {
            self.server.rate_limit_per_minute = v;
        }
        if let Some(v) = env_parse::<u32>("FACTLINE_CHUNK_SECONDS") {
            self.ingest.chunk_seconds = v;
        }
        if let Some(v) = env_bool("FACTLINE_INGEST_RECONNECT") {
            self.ingest.reconnect = v;
        }
        if let Some(v) = env_parse::<u64>("FACTLINE_INGEST_RETRY_BASE_MS") {
            self.ingest.retry_base_ms = v;
        }
        if let Some(v) = env_parse::<u64>("FACTLINE_INGEST_RETRY_MAX_MS") {
            self.ingest.retry_max_ms = v;
        }
        if let Some(v) = env_parse::<u32>("FACTLINE_INGEST_MAX_RETRIES") {
            self.ingest.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("FACTLINE_INGEST_STALL_TIMEOUT_MS") {
            self.ingest.stall_timeout_ms = v;
        }
        if let Some(v) = env_string("FACTLINE_EXTRACTOR_BIN") {
            self.ingest.extractor_bin = v;
        }
        if let Some(v) = env_string("FACTLINE_DECODER_BIN") {
            self.ingest.decoder_bin = v;
        }
        if let Some(v) = env_string("FACTLINE_TRANSCRIBE_API_KEY") {
            self.transcribe.api_key = Some(v);
        }
        if let Some(v) = env_string("FACTLINE_TRANSCRIBE_URL") {
            self.transcribe.url = v;
        }
        if let Some(v) = env_string("FACTLINE_TRANSCRIBE_MODEL") {
            self.transcribe.model = v;
        }
        if let Some(v) = env_parse::<usize>("FACTLINE_RESEARCH_CONCURRENCY") {
            self.research.concurrency = v;
        }
        if let Some(v) = env_parse::<f64>("FACTLINE_DETECTION_THRESHOLD") {
            self.research.detection_threshold = v;
        }
        if let Some(v) = env_string("FACTLINE_FACTCHECK_API_KEY") {
            self.research.factcheck_api_key = Some(v);
        }
        if let Some(v) = env_string("FACTLINE_FRED_API_KEY") {
            self.research.fred_api_key = Some(v);
        }
        if let Some(v) = env_string("FACTLINE_CONGRESS_API_KEY") {
            self.research.congress_api_key = Some(v);
        }
        if let Some(v) = env_string("FACTLINE_VERIFIER_API_KEY") {
            self.research.verifier_api_key = Some(v);
        }
        if let Some(v) = env_string("FACTLINE_VERIFIER_URL") {
            self.research.verifier_url = v;
        }
        if let Some(v) = env_string("FACTLINE_VERIFIER_MODEL") {
            self.research.verifier_model = v;
        }
        if let Some(v) = env_string("FACTLINE_RENDER_ENDPOINT") {
            self.outputs.render_endpoint = Some(v);
        }
        if let Some(v) = env_parse::<u64>("FACTLINE_RENDER_TIMEOUT_MS") {
            self.outputs.render_timeout_ms = v;
        }
        if let Some(v) = env_string("FACTLINE_ACTIVITY_LOG") {
            self.outputs.activity_log = Some(PathBuf::from(v));
        }
        self
    }

    /// Clamp tunables into their documented ranges.
    pub fn clamped(mut self) -> Self {
        self.ingest.chunk_seconds = self
            .ingest
            .chunk_seconds
            .clamp(defaults::CHUNK_SECONDS_MIN, defaults::CHUNK_SECONDS_MAX);
        self.ingest.stall_timeout_ms = self.ingest.stall_timeout_ms.clamp(
            defaults::INGEST_STALL_TIMEOUT_MIN_MS,
            defaults::INGEST_STALL_TIMEOUT_MAX_MS,
        );
        self.research.concurrency = self
            .research
            .concurrency
            .clamp(1, defaults::RESEARCH_CONCURRENCY_MAX);
        self.research.detection_threshold = self.research.detection_threshold.clamp(
            defaults::DETECTION_THRESHOLD_MIN,
            defaults::DETECTION_THRESHOLD_MAX,
        );
        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/factline/config.toml on Linux. `FACTLINE_CONFIG`
    /// overrides it.
    pub fn default_path() -> PathBuf {
        if let Some(path) = env_string("FACTLINE_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("factline")
            .join("config.toml")
    }
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}
