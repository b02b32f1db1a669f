//! Per-turn maintenance
//!
//! [`LifecycleManager::advance_turn`] runs once per completed user turn:
//! recency refresh for entities and actions, the promotion pass, compression
//! when due, then garbage collection.

pub mod compression;
pub mod gc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use compression::{relationship_label, CompressionEngine, CompressionReport};
pub use gc::{GarbageCollector, GcReport};

use crate::config::GraphConfig;
use crate::graph::actions::ActionLog;
use crate::graph::entities::EntityStore;
use crate::types::{Action, Entity, EntityId, Lifecycle, RecencyBucket};

/// Turn and session bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnClock {
    pub current_turn: u64,
    pub session_id: String,
    pub session_start: DateTime<Utc>,
    pub last_compression_turn: u64,
}

/// Fresh random session id
pub fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4().simple())
}

impl TurnClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            current_turn: 0,
            session_id: new_session_id(),
            session_start: now,
            last_compression_turn: 0,
        }
    }

    /// Begin a new session; turn numbering continues
    pub fn start_session(&mut self, now: DateTime<Utc>) {
        self.session_id = new_session_id();
        self.session_start = now;
    }

    pub fn compression_due(&self, interval: u64) -> bool {
        self.current_turn.saturating_sub(self.last_compression_turn) >= interval
    }
}

/// Lifecycle transitions made by one promotion pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PromotionReport {
    pub to_candidate: Vec<EntityId>,
    pub to_promoted: Vec<EntityId>,
}

/// What one `advance_turn` did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReport {
    pub turn: u64,
    pub promotions: PromotionReport,
    pub compression: Option<CompressionReport>,
    pub gc: GcReport,
    pub entities: usize,
    pub actions: usize,
}

pub struct LifecycleManager<'a> {
    config: &'a GraphConfig,
}

impl<'a> LifecycleManager<'a> {
    pub fn new(config: &'a GraphConfig) -> Self {
        Self { config }
    }

    /// Recency of an entity: within the now-window, referenced this session,
    /// within the recall horizon, or forgotten
    pub fn entity_bucket(
        &self,
        entity: &Entity,
        now: DateTime<Utc>,
        session_start: DateTime<Utc>,
    ) -> RecencyBucket {
        let age = now - entity.last_referenced;
        if age < Duration::seconds(self.config.now_window_secs) {
            RecencyBucket::Now
        } else if entity.last_referenced >= session_start {
            RecencyBucket::Earlier
        } else if age < Duration::hours(self.config.recall_horizon_hours) {
            RecencyBucket::LongAgo
        } else {
            RecencyBucket::Forgotten
        }
    }

    /// Recency of an action: within the now-window, same session, within the
    /// recall horizon, or forgotten
    pub fn action_bucket(
        &self,
        action: &Action,
        now: DateTime<Utc>,
        session_id: &str,
    ) -> RecencyBucket {
        let age = now - action.timestamp;
        if age < Duration::seconds(self.config.now_window_secs) {
            RecencyBucket::Now
        } else if action.session_id == session_id {
            RecencyBucket::Earlier
        } else if age < Duration::hours(self.config.recall_horizon_hours) {
            RecencyBucket::LongAgo
        } else {
            RecencyBucket::Forgotten
        }
    }

    pub fn refresh_recency(
        &self,
        store: &mut EntityStore,
        log: &mut ActionLog,
        clock: &TurnClock,
        now: DateTime<Utc>,
    ) {
        let bucket = self.entity_bucket(store.identity(), now, clock.session_start);
        store.identity_mut().recency_bucket = bucket;
        for entity in store.others_mut() {
            entity.recency_bucket = self.entity_bucket(entity, now, clock.session_start);
        }

        for action in log.iter_mut() {
            // Episodes stay where compression put them
            if action.is_episode() {
                continue;
            }
            action.recency_bucket = self.action_bucket(action, now, &clock.session_id);
        }
    }

    /// Move entities at most one tier forward.
    ///
    /// Ephemeral → candidate on reference count; candidate → promoted for user
    /// sources, or on reference count plus confidence for everything else.
    pub fn promote(&self, store: &mut EntityStore) -> PromotionReport {
        let mut report = PromotionReport::default();
        for entity in store.others_mut().filter(|e| !e.is_protected()) {
            match entity.lifecycle {
                Lifecycle::Ephemeral
                    if entity.reference_count >= self.config.candidate_references =>
                {
                    entity.lifecycle = Lifecycle::Candidate;
                    report.to_candidate.push(entity.id.clone());
                }
                Lifecycle::Candidate
                    if entity.source.is_user()
                        || (entity.reference_count >= self.config.promotion_references
                            && entity.confidence >= self.config.promotion_confidence) =>
                {
                    entity.lifecycle = Lifecycle::Promoted;
                    report.to_promoted.push(entity.id.clone());
                }
                _ => {}
            }
        }

        for id in &report.to_candidate {
            tracing::debug!(entity_id = %id, "Entity became candidate");
        }
        for id in &report.to_promoted {
            tracing::info!(entity_id = %id, "Entity promoted");
        }
        report
    }

    /// Run one turn of maintenance
    pub fn advance_turn(
        &self,
        store: &mut EntityStore,
        log: &mut ActionLog,
        clock: &mut TurnClock,
        now: DateTime<Utc>,
    ) -> TurnReport {
        clock.current_turn += 1;

        self.refresh_recency(store, log, clock, now);
        let promotions = self.promote(store);

        let compression = if clock.compression_due(self.config.compression_interval) {
            clock.last_compression_turn = clock.current_turn;
            CompressionEngine::new(self.config).compress(store, log)
        } else {
            None
        };

        let gc = GarbageCollector::new(self.config).collect(store, now);

        tracing::debug!(
            turn = clock.current_turn,
            entities = store.len(),
            actions = log.len(),
            "Advanced turn"
        );

        TurnReport {
            turn: clock.current_turn,
            promotions,
            compression,
            gc,
            entities: store.len(),
            actions: log.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::types::{ActionKind, AttributeMap, EntitySource, EntityType, PREFERENCE_ID};

    fn store() -> EntityStore {
        EntityStore::new(&IdentityConfig::default())
    }

    #[test]
    fn test_entity_buckets() {
        let config = GraphConfig::default();
        let manager = LifecycleManager::new(&config);
        let now = Utc::now();
        let session_start = now - Duration::minutes(30);
        let mut entity = store().identity().clone();

        entity.last_referenced = now - Duration::seconds(30);
        assert_eq!(
            manager.entity_bucket(&entity, now, session_start),
            RecencyBucket::Now
        );

        entity.last_referenced = now - Duration::minutes(10);
        assert_eq!(
            manager.entity_bucket(&entity, now, session_start),
            RecencyBucket::Earlier
        );

        entity.last_referenced = now - Duration::hours(3);
        assert_eq!(
            manager.entity_bucket(&entity, now, session_start),
            RecencyBucket::LongAgo
        );

        entity.last_referenced = now - Duration::hours(30);
        assert_eq!(
            manager.entity_bucket(&entity, now, session_start),
            RecencyBucket::Forgotten
        );
    }

    #[test]
    fn test_action_buckets_follow_session() {
        let config = GraphConfig::default();
        let manager = LifecycleManager::new(&config);
        let now = Utc::now();

        let mut action = Action::new("action:t1-1", 1, ActionKind::Chat, "current");
        action.timestamp = now - Duration::hours(5);
        assert_eq!(
            manager.action_bucket(&action, now, "current"),
            RecencyBucket::Earlier
        );
        assert_eq!(
            manager.action_bucket(&action, now, "other"),
            RecencyBucket::LongAgo
        );

        action.timestamp = now - Duration::hours(25);
        assert_eq!(
            manager.action_bucket(&action, now, "other"),
            RecencyBucket::Forgotten
        );
    }

    #[test]
    fn test_model_inferred_passes_through_candidate() {
        let config = GraphConfig::default();
        let manager = LifecycleManager::new(&config);
        let mut store = store();
        let now = Utc::now();

        for _ in 0..10 {
            store.get_or_create(
                EntityType::Topic,
                "Rust",
                EntitySource::ModelInferred,
                AttributeMap::new(),
                now,
                0.05,
            );
        }
        let id = "entity:topic:rust";
        let entity = store.get(id).unwrap();
        assert_eq!(entity.reference_count, 10);
        assert!(entity.confidence >= 0.7);

        let first = manager.promote(&mut store);
        assert_eq!(first.to_candidate, vec![id.to_string()]);
        assert_eq!(store.get(id).unwrap().lifecycle, Lifecycle::Candidate);

        let second = manager.promote(&mut store);
        assert_eq!(second.to_promoted, vec![id.to_string()]);
        assert_eq!(store.get(id).unwrap().lifecycle, Lifecycle::Promoted);
    }

    #[test]
    fn test_runtime_preference_is_promoted() {
        let config = GraphConfig::default();
        let manager = LifecycleManager::new(&config);
        let mut store = store();
        let mut log = ActionLog::new();
        let mut clock = TurnClock::new(Utc::now());
        let now = Utc::now();

        for _ in 0..10 {
            store.get_or_create(
                EntityType::Preference,
                "dark mode",
                EntitySource::ModelInferred,
                AttributeMap::new(),
                now,
                0.05,
            );
        }
        for _ in 0..3 {
            manager.advance_turn(&mut store, &mut log, &mut clock, Utc::now());
        }

        let pref = store.get("entity:preference:dark_mode").unwrap();
        assert!(!pref.is_protected());
        assert_eq!(pref.lifecycle, Lifecycle::Promoted);
        assert_eq!(
            store.get(PREFERENCE_ID).unwrap().lifecycle,
            Lifecycle::Promoted
        );
    }

    #[test]
    fn test_low_confidence_candidate_waits() {
        let config = GraphConfig::default();
        let manager = LifecycleManager::new(&config);
        let mut store = store();
        let now = Utc::now();

        for _ in 0..5 {
            store.get_or_create(
                EntityType::Topic,
                "Go",
                EntitySource::ModelInferred,
                AttributeMap::new(),
                now,
                0.05,
            );
        }
        manager.promote(&mut store);
        manager.promote(&mut store);
        // 0.3 + 4 * 0.05 = 0.5 < 0.7
        assert_eq!(
            store.get("entity:topic:go").unwrap().lifecycle,
            Lifecycle::Candidate
        );
    }

    #[test]
    fn test_compression_runs_on_interval() {
        let mut config = GraphConfig::default();
        config.compression_interval = 3;
        let manager = LifecycleManager::new(&config);
        let mut store = store();
        let mut log = ActionLog::new();
        let mut clock = TurnClock::new(Utc::now());

        for _ in 0..2 {
            manager.advance_turn(&mut store, &mut log, &mut clock, Utc::now());
        }
        assert_eq!(clock.last_compression_turn, 0);
        manager.advance_turn(&mut store, &mut log, &mut clock, Utc::now());
        assert_eq!(clock.last_compression_turn, 3);
    }
}
