//! Configuration management with YAML support

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub probes: HashMap<String, ProbeConfig>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Individual probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub status: Option<String>, // 'active', 'frozen', 'deprecated'

    #[serde(default)]
    pub base_path: Option<String>,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Characters kept after normalization
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

/// Online repeat tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_similarity")]
    pub similarity_threshold: f64,

    /// Recent embeddings kept for matching new prompts
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Prompts with fewer words are ignored
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    #[serde(default = "default_min_repeats")]
    pub min_repeats_to_surface: u32,

    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_day: u32,

    /// Repeats needed after a dismissal before a candidate comes back
    #[serde(default = "default_resurface_after")]
    pub resurface_after: u32,
}

/// Batch pattern detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_similarity")]
    pub min_similarity: f64,

    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,

    /// Pairwise clustering is quadratic; larger corpora are logged as a warning
    #[serde(default = "default_max_corpus")]
    pub max_corpus: usize,
}

/// Similarity search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub limit: usize,

    #[serde(default = "default_search_similarity")]
    pub min_similarity: f64,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/refrain/refrain.db".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_max_chars() -> usize {
    crate::embedding::DEFAULT_MAX_CHARS
}

fn default_dimensions() -> usize {
    crate::embedding::DEFAULT_DIMENSIONS
}

fn default_tracker_similarity() -> f64 {
    0.80
}

fn default_cache_capacity() -> usize {
    500
}

fn default_min_words() -> usize {
    5
}

fn default_min_repeats() -> u32 {
    3
}

fn default_max_notifications() -> u32 {
    2
}

fn default_resurface_after() -> u32 {
    2
}

fn default_detector_similarity() -> f64 {
    0.75
}

fn default_min_cluster_size() -> usize {
    2
}

fn default_max_patterns() -> usize {
    50
}

fn default_max_corpus() -> usize {
    10_000
}

fn default_search_limit() -> usize {
    10
}

fn default_search_similarity() -> f64 {
    0.30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            dimensions: default_dimensions(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_tracker_similarity(),
            cache_capacity: default_cache_capacity(),
            min_words: default_min_words(),
            min_repeats_to_surface: default_min_repeats(),
            max_notifications_per_day: default_max_notifications(),
            resurface_after: default_resurface_after(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_detector_similarity(),
            min_cluster_size: default_min_cluster_size(),
            max_patterns: default_max_patterns(),
            max_corpus: default_max_corpus(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_search_limit(),
            min_similarity: default_search_similarity(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./refrain.yaml (current directory)
    /// 3. ~/.config/refrain/refrain.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "refrain.yaml".to_string(),
            shellexpand::tilde("~/.config/refrain/refrain.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                tracing::debug!(path = %search_path, "loaded configuration");
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }

    /// Check if a probe is enabled
    /// Returns false if:
    /// - Probe is explicitly disabled
    /// - Probe status is 'frozen' or 'deprecated'
    pub fn is_probe_enabled(&self, probe_id: &str) -> bool {
        self.probes.get(probe_id).map_or(true, |p| {
            if !p.enabled {
                return false;
            }
            !matches!(p.status.as_deref(), Some("frozen") | Some("deprecated"))
        })
    }

    /// Get the base path for a probe, if configured
    pub fn probe_path(&self, probe_id: &str) -> Option<PathBuf> {
        self.probes
            .get(probe_id)
            .and_then(|p| p.base_path.as_ref())
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }
}
