//! Core types for the world graph

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Identifier of an entity (`entity:<type>:<slug>`, `user:self`, `pref:<name>`)
pub type EntityId = String;

/// Identifier of an action (`action:t<turn>-<seq>` or `episode:<first>-<last>`)
pub type ActionId = String;

/// Id of the single identity entity
pub const IDENTITY_ID: &str = "user:self";

/// Id of the configured communication-preference entity
pub const PREFERENCE_ID: &str = "pref:communication";

/// Ids seeded from configuration; exempt from promotion and GC, never restored from disk
pub const PROTECTED_ID_PREFIXES: &[&str] = &["user:", "pref:"];

/// Type of a world entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// The human user (exactly one)
    #[serde(rename = "user")]
    IdentityUser,
    Preference,
    Person,
    Song,
    Artist,
    App,
    Topic,
    Query,
    File,
    Event,
    Task,
    Location,
    /// Generic entity produced by a tool
    External,
}

impl EntityType {
    pub const ALL: [EntityType; 13] = [
        EntityType::IdentityUser,
        EntityType::Preference,
        EntityType::Person,
        EntityType::Song,
        EntityType::Artist,
        EntityType::App,
        EntityType::Topic,
        EntityType::Query,
        EntityType::File,
        EntityType::Event,
        EntityType::Task,
        EntityType::Location,
        EntityType::External,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::IdentityUser => "user",
            EntityType::Preference => "preference",
            EntityType::Person => "person",
            EntityType::Song => "song",
            EntityType::Artist => "artist",
            EntityType::App => "app",
            EntityType::Topic => "topic",
            EntityType::Query => "query",
            EntityType::File => "file",
            EntityType::Event => "event",
            EntityType::Task => "task",
            EntityType::Location => "location",
            EntityType::External => "external",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .or(match lower.as_str() {
                "identity" | "identity-user" | "self" => Some(EntityType::IdentityUser),
                "track" => Some(EntityType::Song),
                _ => None,
            })
            .ok_or_else(|| format!("Unknown entity type: {}", s))
    }
}

/// Provenance: who or what asserted an entity or a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    /// The user explicitly said this (highest trust)
    UserStated,
    /// The user confirmed a suggestion
    UserConfirmed,
    /// Came from a tool execution
    ToolResult,
    /// Filled in by the language model (never auto-trusted)
    #[serde(rename = "llm_inferred")]
    ModelInferred,
    /// Retrieved from long-term memory
    MemoryRecalled,
    /// Created by system initialization
    System,
}

impl EntitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitySource::UserStated => "user_stated",
            EntitySource::UserConfirmed => "user_confirmed",
            EntitySource::ToolResult => "tool_result",
            EntitySource::ModelInferred => "llm_inferred",
            EntitySource::MemoryRecalled => "memory_recalled",
            EntitySource::System => "system",
        }
    }

    /// Sources that speak for the user directly
    pub fn is_user(&self) -> bool {
        matches!(self, EntitySource::UserStated | EntitySource::UserConfirmed)
    }

    /// Default mutation authority for new entities
    pub fn user_sources() -> BTreeSet<EntitySource> {
        [EntitySource::UserStated, EntitySource::UserConfirmed]
            .into_iter()
            .collect()
    }
}

impl std::fmt::Display for EntitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntitySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "user_stated" | "user" => Ok(EntitySource::UserStated),
            "user_confirmed" => Ok(EntitySource::UserConfirmed),
            "tool_result" | "tool" => Ok(EntitySource::ToolResult),
            "llm_inferred" | "model_inferred" | "inferred" => Ok(EntitySource::ModelInferred),
            "memory_recalled" | "memory" => Ok(EntitySource::MemoryRecalled),
            "system" => Ok(EntitySource::System),
            _ => Err(format!("Unknown entity source: {}", s)),
        }
    }
}

/// Trust tier of an entity. Ordered: transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Temporary, untrusted, ignored by semantic recall
    #[default]
    Ephemeral,
    /// Referenced repeatedly, awaiting promotion
    Candidate,
    /// Trusted, searchable, persistent
    Promoted,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Ephemeral => "ephemeral",
            Lifecycle::Candidate => "candidate",
            Lifecycle::Promoted => "promoted",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse time-since-reference classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecencyBucket {
    /// This turn or the last one
    #[default]
    Now,
    /// Earlier in the current session
    Earlier,
    /// A previous session, less than a day ago
    LongAgo,
    /// Beyond the recall horizon
    Forgotten,
}

impl RecencyBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecencyBucket::Now => "now",
            RecencyBucket::Earlier => "earlier",
            RecencyBucket::LongAgo => "long_ago",
            RecencyBucket::Forgotten => "forgotten",
        }
    }
}

impl std::fmt::Display for RecencyBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of recorded action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    #[serde(rename = "tool")]
    ToolCall,
    #[default]
    Chat,
    Clarification,
    Error,
    /// Self-repair after a failed step
    Correction,
    /// Compressed run of older actions (terminal)
    Episode,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ToolCall => "tool",
            ActionKind::Chat => "chat",
            ActionKind::Clarification => "clarification",
            ActionKind::Error => "error",
            ActionKind::Correction => "correction",
            ActionKind::Episode => "episode",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive (never causal) label of the user's interaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserIntent {
    Curious,
    Frustrated,
    #[default]
    Casual,
    Urgent,
    Playful,
    TaskFocused,
}

impl UserIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserIntent::Curious => "curious",
            UserIntent::Frustrated => "frustrated",
            UserIntent::Casual => "casual",
            UserIntent::Urgent => "urgent",
            UserIntent::Playful => "playful",
            UserIntent::TaskFocused => "task_focused",
        }
    }
}

impl std::fmt::Display for UserIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attribute value.
///
/// Serialized untagged so snapshots hold plain JSON scalars, lists and objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
    Map(AttributeMap),
}

/// String-keyed attribute bag with deterministic ordering
pub type AttributeMap = BTreeMap<String, AttrValue>;

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether the value carries nothing useful (empty text or list)
    pub fn is_blank(&self) -> bool {
        match self {
            AttrValue::Text(s) => s.trim().is_empty(),
            AttrValue::List(items) => items.is_empty(),
            AttrValue::Map(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            AttrValue::Number(n) => write!(f, "{}", n),
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::List(items) => f.write_str(&items.join(", ")),
            AttrValue::Map(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Number(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Number(value as f64)
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Number(value as f64)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        AttrValue::List(value)
    }
}

impl From<AttributeMap> for AttrValue {
    fn from(value: AttributeMap) -> Self {
        AttrValue::Map(value)
    }
}

/// Build an [`AttributeMap`] from key/value pairs
pub fn attributes<K, V, I>(pairs: I) -> AttributeMap
where
    K: Into<String>,
    V: Into<AttrValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize a display name into an id slug: trimmed, lower-cased, whitespace runs → `_`
pub fn slugify(name: &str) -> String {
    WHITESPACE
        .replace_all(name.trim(), "_")
        .to_lowercase()
}

/// Deterministic entity id for a type + name
pub fn entity_id(entity_type: EntityType, name: &str) -> EntityId {
    match entity_type {
        EntityType::IdentityUser => IDENTITY_ID.to_string(),
        _ => format!("entity:{}:{}", entity_type.as_str(), slugify(name)),
    }
}

/// Something the assistant knows about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Human-readable name
    pub name: String,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Who created this entity
    pub source: EntitySource,
    /// Sources allowed to mutate this entity
    #[serde(default = "EntitySource::user_sources")]
    pub mutable_by: BTreeSet<EntitySource>,
    pub created_at: DateTime<Utc>,
    pub last_referenced: DateTime<Utc>,
    #[serde(default)]
    pub reference_count: u32,
    #[serde(default)]
    pub recency_bucket: RecencyBucket,
    /// 0.0 - 1.0
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Claims that must never be asserted about this entity
    #[serde(default)]
    pub not_claims: Vec<String>,
    /// Cached summary, regenerated on every mutation
    #[serde(default)]
    pub summary: String,
}

fn default_confidence() -> f32 {
    0.5
}

impl Entity {
    /// Create an entity with the given trust tier; summary is left to the store
    pub fn new(
        entity_type: EntityType,
        name: impl Into<String>,
        source: EntitySource,
        lifecycle: Lifecycle,
        confidence: f32,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: entity_id(entity_type, &name),
            entity_type,
            name,
            attributes: AttributeMap::new(),
            lifecycle,
            source,
            mutable_by: EntitySource::user_sources(),
            created_at: now,
            last_referenced: now,
            reference_count: 0,
            recency_bucket: RecencyBucket::Now,
            confidence: confidence.clamp(0.0, 1.0),
            not_claims: Vec::new(),
            summary: String::new(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.entity_type == EntityType::IdentityUser
    }

    /// Configured identity and preference entities, keyed by id rather than type
    pub fn is_protected(&self) -> bool {
        PROTECTED_ID_PREFIXES.iter().any(|p| self.id.starts_with(p))
    }

    /// Whether `source` may mutate this entity.
    ///
    /// The identity entity ignores its stored authority set: only user sources apply.
    pub fn can_be_mutated_by(&self, source: EntitySource) -> bool {
        if self.is_identity() {
            return source.is_user();
        }
        self.mutable_by.contains(&source)
    }

    /// Record a reference: count++, recency reset, confidence nudged up by `boost`
    pub fn touch(&mut self, now: DateTime<Utc>, boost: f32) {
        self.last_referenced = now;
        self.reference_count = self.reference_count.saturating_add(1);
        self.recency_bucket = RecencyBucket::Now;
        if !self.is_identity() {
            self.confidence = (self.confidence + boost).min(1.0);
        }
    }

    /// Seconds since the entity was last referenced
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_referenced).num_seconds()
    }
}

/// Follow-up suggested by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUp {
    /// Re-run the resolved action
    Repeat,
    /// Re-run the resolved action's arguments through a different tool
    ModifyTool,
}

impl FollowUp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUp::Repeat => "repeat",
            FollowUp::ModifyTool => "modify_tool",
        }
    }
}

/// Something that happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// Conversation turn number
    pub turn: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "action_type", default)]
    pub kind: ActionKind,
    pub tool: Option<String>,
    #[serde(default)]
    pub args: AttributeMap,
    /// Truncated result text
    pub result: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    /// The single entity this action is primarily about
    pub focus_entity: Option<EntityId>,
    #[serde(default)]
    pub entities_involved: Vec<EntityId>,
    /// Planner dependency on an earlier action
    pub depends_on: Option<ActionId>,
    #[serde(default)]
    pub user_intent: UserIntent,
    /// 0.0 - 1.0
    pub user_satisfaction: Option<f32>,
    /// 0.0 (trivial) to 1.0 (life event)
    #[serde(default = "default_significance")]
    pub significance: f32,
    /// Facts that survive compression verbatim
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub recency_bucket: RecencyBucket,
    #[serde(default)]
    pub session_id: String,
}

fn default_success() -> bool {
    true
}

pub(crate) fn default_significance() -> f32 {
    0.5
}

impl Action {
    /// Bare action of the given kind; the action log fills in inference results
    pub fn new(id: impl Into<ActionId>, turn: u64, kind: ActionKind, session_id: &str) -> Self {
        Self {
            id: id.into(),
            turn,
            timestamp: Utc::now(),
            kind,
            tool: None,
            args: AttributeMap::new(),
            result: None,
            success: true,
            focus_entity: None,
            entities_involved: Vec::new(),
            depends_on: None,
            user_intent: UserIntent::Casual,
            user_satisfaction: None,
            significance: default_significance(),
            key_facts: Vec::new(),
            summary: String::new(),
            recency_bucket: RecencyBucket::Now,
            session_id: session_id.to_string(),
        }
    }

    pub fn is_episode(&self) -> bool {
        self.kind == ActionKind::Episode
    }

    /// Label used when tallying interactions ("chat" for tool-less actions)
    pub fn interaction_label(&self) -> &str {
        self.tool.as_deref().unwrap_or("chat")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Shape of You "), "shape_of_you");
        assert_eq!(slugify("Bohemian\tRhapsody"), "bohemian_rhapsody");
        assert_eq!(slugify("already_slugged"), "already_slugged");
    }

    #[test]
    fn test_entity_id_is_deterministic() {
        assert_eq!(
            entity_id(EntityType::Song, "Shape of You"),
            "entity:song:shape_of_you"
        );
        assert_eq!(
            entity_id(EntityType::Song, "shape  of you"),
            entity_id(EntityType::Song, "Shape of You")
        );
        assert_eq!(entity_id(EntityType::IdentityUser, "anyone"), IDENTITY_ID);
    }

    #[test]
    fn test_enum_tokens_are_stable() {
        assert_eq!(
            serde_json::to_string(&EntitySource::ModelInferred).unwrap(),
            "\"llm_inferred\""
        );
        assert_eq!(
            serde_json::to_string(&EntityType::IdentityUser).unwrap(),
            "\"user\""
        );
        assert_eq!(
            serde_json::to_string(&RecencyBucket::LongAgo).unwrap(),
            "\"long_ago\""
        );
        assert_eq!(serde_json::to_string(&ActionKind::ToolCall).unwrap(), "\"tool\"");
        assert_eq!(
            serde_json::to_string(&UserIntent::TaskFocused).unwrap(),
            "\"task_focused\""
        );
    }

    #[test]
    fn test_entity_type_from_str() {
        assert_eq!(EntityType::from_str("Song").unwrap(), EntityType::Song);
        assert_eq!(
            EntityType::from_str("user").unwrap(),
            EntityType::IdentityUser
        );
        assert!(EntityType::from_str("spaceship").is_err());
    }

    #[test]
    fn test_lifecycle_ordering() {
        assert!(Lifecycle::Ephemeral < Lifecycle::Candidate);
        assert!(Lifecycle::Candidate < Lifecycle::Promoted);
    }

    #[test]
    fn test_attr_value_untagged_roundtrip() {
        let mut nested = AttributeMap::new();
        nested.insert("spotify_control".into(), AttrValue::Number(3.0));
        let attrs = attributes([
            ("age", AttrValue::Number(22.0)),
            ("location", AttrValue::from("Bangalore")),
            ("interests", AttrValue::List(vec!["AI".into(), "Anime".into()])),
            ("verified", AttrValue::Bool(true)),
            ("interaction_types", AttrValue::Map(nested)),
        ]);

        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["location"], "Bangalore");
        assert_eq!(json["interests"][1], "Anime");

        let back: AttributeMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_attr_value_display() {
        assert_eq!(AttrValue::Number(22.0).to_string(), "22");
        assert_eq!(AttrValue::Number(0.5).to_string(), "0.5");
        assert_eq!(
            AttrValue::List(vec!["a".into(), "b".into()]).to_string(),
            "a, b"
        );
    }

    #[test]
    fn test_identity_ignores_stored_authority() {
        let mut identity = Entity::new(
            EntityType::IdentityUser,
            "Sam",
            EntitySource::System,
            Lifecycle::Promoted,
            1.0,
        );
        identity.mutable_by.insert(EntitySource::ToolResult);
        assert!(!identity.can_be_mutated_by(EntitySource::ToolResult));
        assert!(!identity.can_be_mutated_by(EntitySource::System));
        assert!(identity.can_be_mutated_by(EntitySource::UserStated));
        assert!(identity.can_be_mutated_by(EntitySource::UserConfirmed));
    }

    #[test]
    fn test_touch_caps_confidence() {
        let mut e = Entity::new(
            EntityType::Song,
            "x",
            EntitySource::ToolResult,
            Lifecycle::Ephemeral,
            0.98,
        );
        e.touch(Utc::now(), 0.05);
        assert_eq!(e.reference_count, 1);
        assert!((e.confidence - 1.0).abs() < f32::EPSILON);
    }
}
