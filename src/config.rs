//! Server configuration
//!
//! Layered: defaults < TOML file < `FASTSCAN_*` environment < CLI flags.
//! The CLI layer lives in `main.rs`; this module handles the first three.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Buffer-size range exposed to the dashboard slider (frames ahead).
pub const MIN_BUFFER_SIZE: usize = 10;
pub const MAX_BUFFER_SIZE: usize = 200;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "FASTSCAN_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory holding the CSV datasets.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Trace cache bound in entries. <= 0 disables caching.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: i64,

    /// Floor applied when the buffer size changes at runtime.
    #[serde(default = "default_min_cache_capacity")]
    pub min_cache_capacity: i64,

    /// Prefetch base horizon (frames ahead).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Prefetch interval at 1x speed.
    #[serde(default = "default_prefetch_interval_ms")]
    pub prefetch_interval_ms: u64,

    /// Upper bound on rows in one chunk response.
    #[serde(default = "default_max_chunk_rows")]
    pub max_chunk_rows: usize,

    /// Multiplier from order size to bar length.
    #[serde(default = "default_bar_scale_coeff")]
    pub bar_scale_coeff: f64,

    /// Sessions idle longer than this are pruned. 0 keeps them forever.
    #[serde(default = "default_session_idle_ttl_ms")]
    pub session_idle_ttl_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_cache_capacity() -> i64 {
    200
}

fn default_min_cache_capacity() -> i64 {
    100
}

fn default_buffer_size() -> usize {
    50
}

fn default_prefetch_interval_ms() -> u64 {
    100
}

fn default_max_chunk_rows() -> usize {
    5000
}

fn default_bar_scale_coeff() -> f64 {
    1.0
}

fn default_session_idle_ttl_ms() -> u64 {
    30 * 60 * 1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            cache_capacity: default_cache_capacity(),
            min_cache_capacity: default_min_cache_capacity(),
            buffer_size: default_buffer_size(),
            prefetch_interval_ms: default_prefetch_interval_ms(),
            max_chunk_rows: default_max_chunk_rows(),
            bar_scale_coeff: default_bar_scale_coeff(),
            session_idle_ttl_ms: default_session_idle_ttl_ms(),
        }
    }
}

impl ServerConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config.normalized())
    }

    /// `path` if given, else the file named by `FASTSCAN_CONFIG`, else
    /// `fastscan.toml`; then env overrides.
    ///
    /// A missing default file is not an error; an explicitly named one is.
    pub fn from_path_or_env(path: Option<&Path>) -> anyhow::Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from("fastscan.toml"));

        let mut cfg = match Self::load(&path) {
            Ok(cfg) => cfg,
            Err(e) if explicit.is_some() => {
                return Err(e.context(format!("failed to load config file {}", path.display())))
            }
            Err(e) => {
                tracing::debug!("Using default server config ({}): {}", path.display(), e);
                Self::default()
            }
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        Ok(cfg.normalized())
    }

    /// Apply `FASTSCAN_*` overrides through `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FASTSCAN_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("FASTSCAN_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FASTSCAN_CACHE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.cache_capacity = v;
        }
        if let Some(v) = lookup("FASTSCAN_MIN_CACHE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.min_cache_capacity = v;
        }
        if let Some(v) = lookup("FASTSCAN_BUFFER_SIZE").and_then(|v| v.parse().ok()) {
            self.buffer_size = v;
        }
        if let Some(v) = lookup("FASTSCAN_PREFETCH_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.prefetch_interval_ms = v;
        }
        if let Some(v) = lookup("FASTSCAN_MAX_CHUNK_ROWS").and_then(|v| v.parse().ok()) {
            self.max_chunk_rows = v;
        }
        if let Some(v) = lookup("FASTSCAN_BAR_SCALE_COEFF").and_then(|v| v.parse::<f64>().ok()) {
            if v.is_finite() && v > 0.0 {
                self.bar_scale_coeff = v;
            }
        }
        if let Some(v) = lookup("FASTSCAN_SESSION_IDLE_TTL_MS").and_then(|v| v.parse().ok()) {
            self.session_idle_ttl_ms = v;
        }
    }

    /// Clamp values into their supported ranges.
    pub fn normalized(mut self) -> Self {
        self.buffer_size = self.buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self.max_chunk_rows = self.max_chunk_rows.max(1);
        self.prefetch_interval_ms = self.prefetch_interval_ms.max(1);
        if !(self.bar_scale_coeff.is_finite() && self.bar_scale_coeff > 0.0) {
            self.bar_scale_coeff = default_bar_scale_coeff();
        }
        self
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
