//! Configuration structures for Quill
//!
//! This module defines all configuration types used by the multiplexer and the
//! generation worker. Configurations are loaded from YAML files and can be
//! overridden by environment variables. Everything is fixed at startup; there is
//! no runtime reconfiguration.

use crate::error::{QuillError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Top-level configuration for the Quill server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuillConfig {
    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connection multiplexer configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Generation worker configuration
    pub worker: WorkerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Connection multiplexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Literal client message acknowledged and ignored as a keep-alive
    #[serde(default = "default_keep_alive_message")]
    pub keep_alive_message: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            keep_alive_message: default_keep_alive_message(),
        }
    }
}

/// Generation worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Vocabulary table path (JSON object of id -> symbol)
    pub vocab_path: PathBuf,

    /// Model weights path (safetensors)
    pub weights_path: PathBuf,

    /// Compute device: "cpu", "cuda" or "cuda:N"
    #[serde(default)]
    pub device: DeviceSpec,

    /// Maximum number of trailing tokens the model sees
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Number of tokens generated for every request
    #[serde(default = "default_tokens_per_request")]
    pub tokens_per_request: usize,

    /// Vocabulary symbol reserved for characters outside the table
    #[serde(default = "default_unknown_symbol")]
    pub unknown_symbol: String,

    /// Fixed sampler seed; entropy-seeded when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Sampling policies
    #[serde(default)]
    pub sampling: SamplingConfig,
}

/// Sampling policy parameters for both decode branches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Used when the previous token is a line break
    #[serde(default)]
    pub line_start: LineStartSampling,

    /// Used inside a line
    #[serde(default)]
    pub continuation: ContinuationSampling,
}

/// Nucleus sampling parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineStartSampling {
    #[serde(default = "default_line_start_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

impl Default for LineStartSampling {
    fn default() -> Self {
        Self {
            temperature: default_line_start_temperature(),
            top_p: default_top_p(),
        }
    }
}

/// Min-p sampling parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContinuationSampling {
    #[serde(default = "default_continuation_temperature")]
    pub temperature: f32,

    /// Fraction of the (powered) top probability a candidate must reach
    #[serde(default = "default_min_p_ratio")]
    pub min_p_ratio: f32,

    /// Power applied to the top probability before scaling by the ratio
    #[serde(default = "default_min_p_pow")]
    pub min_p_pow: f32,
}

impl Default for ContinuationSampling {
    fn default() -> Self {
        Self {
            temperature: default_continuation_temperature(),
            min_p_ratio: default_min_p_ratio(),
            min_p_pow: default_min_p_pow(),
        }
    }
}

/// Compute device selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpec {
    /// Host CPU
    #[default]
    Cpu,

    /// CUDA device by ordinal
    Cuda(usize),
}

impl FromStr for DeviceSpec {
    type Err = QuillError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(DeviceSpec::Cpu),
            "cuda" | "gpu" => Ok(DeviceSpec::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|ordinal| ordinal.parse().ok())
                .map(DeviceSpec::Cuda)
                .ok_or_else(|| QuillError::config(format!("Invalid device: {}", other))),
        }
    }
}

impl std::fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
        }
    }
}

impl Serialize for DeviceSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
            metrics_port: default_metrics_port(),
        }
    }
}

/// Default value functions
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8266
}

fn default_keep_alive_message() -> String {
    "[PONG]".to_string()
}

fn default_context_window() -> usize {
    512
}

fn default_tokens_per_request() -> usize {
    20
}

fn default_unknown_symbol() -> String {
    "\u{e083}".to_string()
}

fn default_line_start_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    0.995
}

fn default_continuation_temperature() -> f32 {
    0.9
}

fn default_min_p_ratio() -> f32 {
    0.02
}

fn default_min_p_pow() -> f32 {
    2.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9091
}

impl QuillConfig {
    /// Load configuration from a YAML file, apply environment overrides and validate
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| QuillError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let mut config = Self::from_yaml(&content)
            .map_err(|e| QuillError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document without validating it
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Override selected fields from `QUILL_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind_address) = lookup("QUILL_BIND_ADDRESS") {
            self.bind_address = bind_address;
        }
        if let Some(port) = lookup("QUILL_PORT") {
            self.port = port
                .parse()
                .map_err(|_| QuillError::Config(format!("Invalid port number: {}", port)))?;
        }
        if let Some(device) = lookup("QUILL_DEVICE") {
            self.worker.device = device.parse()?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(QuillError::config("port must be non-zero"));
        }
        self.listen_addr()?;

        let worker = &self.worker;
        if worker.context_window == 0 {
            return Err(QuillError::config("worker.context_window must be at least 1"));
        }
        if worker.tokens_per_request == 0 {
            return Err(QuillError::config("worker.tokens_per_request must be at least 1"));
        }
        if worker.unknown_symbol.is_empty() {
            return Err(QuillError::config("worker.unknown_symbol must not be empty"));
        }

        let line_start = &worker.sampling.line_start;
        if !(line_start.temperature > 0.0) {
            return Err(QuillError::config("sampling.line_start.temperature must be positive"));
        }
        if !(line_start.top_p > 0.0 && line_start.top_p <= 1.0) {
            return Err(QuillError::config("sampling.line_start.top_p must be in (0, 1]"));
        }

        let continuation = &worker.sampling.continuation;
        if !(continuation.temperature > 0.0) {
            return Err(QuillError::config("sampling.continuation.temperature must be positive"));
        }
        if !(0.0..=1.0).contains(&continuation.min_p_ratio) {
            return Err(QuillError::config("sampling.continuation.min_p_ratio must be in [0, 1]"));
        }
        if !(continuation.min_p_pow > 0.0) {
            return Err(QuillError::config("sampling.continuation.min_p_pow must be positive"));
        }

        if self.observability.enable_metrics && self.observability.metrics_port == self.port {
            return Err(QuillError::config("observability.metrics_port must differ from port"));
        }

        Ok(())
    }

    /// Address the multiplexer listens on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.bind_address, self.port).parse()?)
    }

    /// Address the metrics endpoint listens on
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.bind_address, self.observability.metrics_port).parse()?)
    }
}
