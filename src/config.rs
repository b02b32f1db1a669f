//! Graph configuration
//!
//! Configuration comes from a TOML file, from `WORLDGRAPH_*` environment
//! variables, or from [`GraphConfig::default`]. The identity section is the
//! static source of truth for the identity and preference entities: they are
//! rebuilt from it at construction and on reset, never restored from disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::types::{AttrValue, AttributeMap, EntityType};

/// Static description of the user and their communication preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Display name of the user
    pub name: String,
    /// Identity attributes (age, location, interests, ...)
    pub attributes: AttributeMap,
    /// Things that must never be asserted about the user
    pub not_claims: Vec<String>,
    /// Communication preference attributes
    pub preferences: AttributeMap,
    /// Human-readable preference summary for prompt injection
    pub preference_summary: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let mut preferences = AttributeMap::new();
        preferences.insert("style".into(), AttrValue::from("practical, direct"));
        preferences.insert("prefers".into(), AttrValue::from("minimal responses"));
        Self {
            name: "User".to_string(),
            attributes: AttributeMap::new(),
            not_claims: vec![
                "NOT a public figure".to_string(),
                "NOT a celebrity".to_string(),
            ],
            preferences,
            preference_summary: "Prefers practical, direct replies.".to_string(),
        }
    }
}

/// Semantic recall and embedder lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Embedding backend (`hashing`)
    pub model: String,
    pub dimensions: usize,
    /// Seconds of disuse before the embedder is unloaded
    pub idle_unload_secs: u64,
    /// Cached embeddings kept in memory
    pub cache_entries: usize,
    /// Upper bound on one recall call
    pub timeout_ms: u64,
    /// Default number of hits
    pub top_k: usize,
    /// Entities below this confidence are not recalled
    pub min_confidence: f32,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            model: "hashing".to_string(),
            dimensions: 384,
            idle_unload_secs: 300,
            cache_entries: 512,
            timeout_ms: 2000,
            top_k: 5,
            min_confidence: 0.3,
        }
    }
}

/// Tuning knobs for the graph, its maintenance passes and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Snapshot file; `None` keeps the graph in memory only
    pub snapshot_path: Option<PathBuf>,
    /// Turns between compression runs
    pub compression_interval: u64,
    /// Minimum qualifying actions before a compression run does anything
    pub compression_min_batch: usize,
    /// Actions at or above this significance are never compressed
    pub compression_significance_threshold: f32,
    /// Child summaries concatenated into an episode summary
    pub episode_summary_limit: usize,
    /// Key facts kept on an episode
    pub episode_key_fact_limit: usize,
    /// Idle seconds before an ephemeral entity is collectable
    pub ephemeral_idle_secs: i64,
    /// Ephemeral entities referenced at least this often survive the idle pass
    pub ephemeral_min_references: u32,
    /// Idle days before a candidate entity is collectable
    pub candidate_idle_days: i64,
    /// Hard population cap per entity type
    pub type_caps: BTreeMap<EntityType, usize>,
    /// Seconds within which something counts as "now"
    pub now_window_secs: i64,
    /// Hours after which something from another session is "forgotten"
    pub recall_horizon_hours: i64,
    /// Actions kept in a saved snapshot
    pub persisted_action_limit: usize,
    /// Actions carried in an immutable read snapshot
    pub snapshot_action_window: usize,
    /// Confidence gained per reference
    pub touch_confidence_boost: f32,
    /// Reference count for ephemeral → candidate
    pub candidate_references: u32,
    /// Reference count for candidate → promoted
    pub promotion_references: u32,
    /// Confidence for candidate → promoted
    pub promotion_confidence: f32,
    /// Stored tool results are truncated to this many characters
    pub result_char_limit: usize,
    /// Character budget of the planner context
    pub planner_budget: usize,
    /// Character budget of the responder context
    pub responder_budget: usize,
    pub identity: IdentityConfig,
    pub recall: RecallConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            compression_interval: 15,
            compression_min_batch: 5,
            compression_significance_threshold: 0.7,
            episode_summary_limit: 5,
            episode_key_fact_limit: 10,
            ephemeral_idle_secs: 3600,
            ephemeral_min_references: 2,
            candidate_idle_days: 7,
            type_caps: default_type_caps(),
            now_window_secs: 120,
            recall_horizon_hours: 24,
            persisted_action_limit: 100,
            snapshot_action_window: 20,
            touch_confidence_boost: 0.05,
            candidate_references: 3,
            promotion_references: 5,
            promotion_confidence: 0.7,
            result_char_limit: 500,
            planner_budget: 500,
            responder_budget: 1200,
            identity: IdentityConfig::default(),
            recall: RecallConfig::default(),
        }
    }
}

/// Per-type population caps
pub fn default_type_caps() -> BTreeMap<EntityType, usize> {
    [
        (EntityType::Query, 200),
        (EntityType::Song, 150),
        (EntityType::App, 100),
        (EntityType::Topic, 150),
        (EntityType::External, 100),
    ]
    .into_iter()
    .collect()
}

/// Default snapshot location under the platform data directory
pub fn default_snapshot_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("worldgraph")
        .join("world_graph.json")
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
    }
}

impl GraphConfig {
    /// In-memory graph with default tuning
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Default tuning persisted at `path`
    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parse a TOML configuration document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: GraphConfig = toml::from_str(raw)
            .map_err(|e| GraphError::Config(format!("Invalid graph config: {}", e)))?;
        if let Some(path) = config.snapshot_path.take() {
            config.snapshot_path = Some(expand_path(&path.to_string_lossy()));
        }
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GraphError::Config(format!(
                "Cannot read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Build configuration from the environment.
    ///
    /// - `WORLDGRAPH_CONFIG`: TOML file used as the base
    /// - `WORLDGRAPH_PATH`: snapshot path
    /// - `WORLDGRAPH_COMPRESSION_INTERVAL`: turns between compression runs
    /// - `WORLDGRAPH_IDENTITY`: TOML file holding an `[identity]`-shaped table
    /// - `WORLDGRAPH_EMBEDDING_MODEL`: recall embedding backend
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("WORLDGRAPH_CONFIG") {
            Ok(path) => Self::from_toml_file(expand_path(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(path) = std::env::var("WORLDGRAPH_PATH") {
            config.snapshot_path = Some(expand_path(&path));
        }

        if let Ok(raw) = std::env::var("WORLDGRAPH_COMPRESSION_INTERVAL") {
            config.compression_interval = raw.trim().parse().map_err(|_| {
                GraphError::Config(format!(
                    "WORLDGRAPH_COMPRESSION_INTERVAL must be a positive integer, got '{}'",
                    raw
                ))
            })?;
        }

        if let Ok(model) = std::env::var("WORLDGRAPH_EMBEDDING_MODEL") {
            config.recall.model = model;
        }

        if let Ok(path) = std::env::var("WORLDGRAPH_IDENTITY") {
            config.identity = IdentityConfig::from_toml_file(expand_path(&path))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break maintenance invariants
    pub fn validate(&self) -> Result<()> {
        if self.compression_interval == 0 {
            return Err(GraphError::Config(
                "compression_interval must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.promotion_confidence) {
            return Err(GraphError::Config(
                "promotion_confidence must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.candidate_references > self.promotion_references {
            return Err(GraphError::Config(
                "candidate_references must not exceed promotion_references".to_string(),
            ));
        }
        if self.recall.dimensions == 0 {
            return Err(GraphError::Config("recall dimensions must be positive".to_string()));
        }
        if self.identity.name.trim().is_empty() {
            return Err(GraphError::Config("identity name cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Cap for a type, if any
    pub fn type_cap(&self, entity_type: EntityType) -> Option<usize> {
        self.type_caps.get(&entity_type).copied()
    }
}

impl IdentityConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GraphError::Config(format!(
                "Cannot read identity {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        toml::from_str(&raw).map_err(|e| GraphError::Config(format!("Invalid identity: {}", e)))
    }
}
