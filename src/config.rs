//! Configuration for a seispar job.

use crate::bundle::ConfigBundle;
use crate::dispatch::Strategy;
use crate::model::Catalog;
use crate::transform::TransformSpec;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Main configuration for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    pub input: InputConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Transform applied to each partition
    #[serde(default)]
    pub transform: TransformSpec,

    /// Opaque parameters forwarded to the transform
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Input file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Observed recordings (.json, .yaml or .yml)
    pub recordings: String,

    /// Station catalog (.json, .yaml or .yml)
    pub catalog: String,

    /// Optional synthetic recordings, partitioned alongside the observed ones by `plan`
    #[serde(default)]
    pub synthetics: Option<String>,
}

/// Output file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Where the merged recordings are written
    pub path: String,
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Dispatch strategy
    #[serde(default)]
    pub strategy: Strategy,

    /// Number of workers (pool) or ranks (collective)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Partitions per worker for the pool strategy
    #[serde(default = "default_chunks_per_worker")]
    pub chunks_per_worker: usize,

    /// Log dispatch progress at info level
    #[serde(default)]
    pub verbose: bool,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Rayon thread pool size for partitioning
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            workers: default_workers(),
            chunks_per_worker: default_chunks_per_worker(),
            verbose: false,
            worker_threads: None,
            rayon_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML, JSON or TOML file.
    /// Format is auto-detected from file extension (.yaml, .yml, .json or .toml).
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config = match ext {
            "yaml" | "yml" => Self::from_yaml(&contents),
            "json" => Self::from_json(&contents),
            "toml" => Self::from_toml(&contents),
            // YAML is a superset of JSON
            _ => Self::from_yaml(&contents),
        };
        config.with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(toml)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.recordings.trim().is_empty() {
            bail!("input.recordings must not be empty");
        }
        if self.input.catalog.trim().is_empty() {
            bail!("input.catalog must not be empty");
        }
        if matches!(&self.input.synthetics, Some(p) if p.trim().is_empty()) {
            bail!("input.synthetics must not be empty when set");
        }
        if self.output.path.trim().is_empty() {
            bail!("output.path must not be empty");
        }
        if self.processing.workers == 0 {
            bail!("processing.workers must be > 0");
        }
        if self.processing.chunks_per_worker == 0 {
            bail!("processing.chunks_per_worker must be > 0");
        }
        if let TransformSpec::Multiply { factor } = &self.transform {
            match factor.or_else(|| self.params.get("factor").and_then(Value::as_f64)) {
                Some(f) if f.is_finite() => {}
                Some(f) => bail!("multiply factor must be finite, got {}", f),
                None => bail!("multiply needs transform.factor or params.factor"),
            }
        }
        Ok(())
    }

    /// Config bundle carrying `catalog` and this job's parameters.
    pub fn bundle(&self, catalog: Catalog) -> ConfigBundle {
        ConfigBundle::with_params(catalog, self.params.clone())
    }
}

/// Commented sample configuration written by `seispar generate-config`.
pub const SAMPLE_CONFIG: &str = r#"# seispar job configuration

# === INPUT: recordings and station metadata ===
input:
  # Observed recordings (.json, .yaml or .yml)
  recordings: "data/observed.json"

  # Station catalog; recordings whose station is missing here are dropped
  catalog: "data/stations.json"

  # Optional synthetics; `seispar plan` reports how they split per bucket
  # synthetics: "data/synthetic.json"

# === OUTPUT: merged, transformed recordings ===
output:
  path: "out/processed.json"

# === PROCESSING: dispatch tuning ===
processing:
  # pool | collective | auto (collective if a rank group can be formed)
  strategy: pool

  # Workers (pool) or ranks (collective)
  workers: 4

  # Partitions per worker; >1 evens out uneven stations (pool only)
  chunks_per_worker: 1

  # Log dispatch progress at info level
  verbose: false

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Rayon thread pool size for partitioning (null = num CPUs)
  # rayon_threads: 8

  # Print a metrics summary after the run
  enable_metrics: true
  metrics_interval_secs: 10

  # metrics_output_path: "out/metrics.json"

# === TRANSFORM: applied to each partition ===
# kind: identity | multiply | demean
transform:
  kind: multiply
  # factor: 2.0   # falls back to params.factor

# === PARAMS: passed through to every worker ===
params:
  factor: 1.0
"#;

// Default value functions for serde
fn default_workers() -> usize { 4 }
fn default_chunks_per_worker() -> usize { 1 }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
