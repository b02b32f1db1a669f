//! Worldgraph - structured short-term memory for AI assistants
//!
//! Tracks what the assistant knows (entities), what it did (actions) and how
//! much it trusts each fact. Resolves vague references ("play that again"),
//! builds bounded prompt context, vetoes plans that contradict the user's
//! identity, and ages memory through promotion, compression and garbage
//! collection.

pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod recall;
pub mod service;
pub mod storage;
pub mod types;

pub use config::{GraphConfig, IdentityConfig, RecallConfig};
pub use error::{GraphError, Result};
pub use graph::{
    ActionRecord, GraphSnapshot, GraphStats, GraphView, Plan, PlanCheck, PlanStep, Resolution,
    ResolutionRule, ResolvedTarget, WorldGraph,
};
pub use lifecycle::TurnReport;
pub use recall::{RecallHit, RecallOptions, SemanticRecall};
pub use service::{GraphHandle, GraphService};
pub use storage::LoadOutcome;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
