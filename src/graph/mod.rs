//! The world graph
//!
//! [`WorldGraph`] owns the entity store, the action log and the turn clock.
//! It is a plain single-owner value: wrap it in a
//! [`GraphService`](crate::service::GraphService) to share it between tasks.

pub mod actions;
pub mod context;
pub mod entities;
pub mod intent;
pub mod resolver;
pub mod validation;
pub mod view;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use actions::{ActionLog, ActionRecord};
pub use entities::EntityStore;
pub use resolver::{Resolution, ResolutionRule, ResolvedTarget};
pub use validation::{Plan, PlanCheck, PlanStep};
pub use view::{ContextBudgets, GraphSnapshot, GraphView};

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::lifecycle::{LifecycleManager, TurnClock, TurnReport};
use crate::storage::{LoadOutcome, PersistenceManager, SnapshotEnvelope};
use crate::types::{
    Action, ActionKind, AttributeMap, Entity, EntitySource, EntityType, Lifecycle, UserIntent,
};
use actions::RecordContext;

/// First `limit` characters of `text`
pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Graph statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub turn: u64,
    pub session_id: String,
    pub entities: usize,
    pub by_lifecycle: BTreeMap<Lifecycle, usize>,
    pub by_type: BTreeMap<EntityType, usize>,
    pub actions: usize,
    pub episodes: usize,
    pub key_facts: usize,
    pub intent: UserIntent,
    pub last_compression_turn: u64,
}

/// Entities, actions and the maintenance state over them
#[derive(Debug, Clone)]
pub struct WorldGraph {
    config: GraphConfig,
    entities: EntityStore,
    actions: ActionLog,
    clock: TurnClock,
    intent: UserIntent,
    persistence: PersistenceManager,
}

impl WorldGraph {
    /// Fresh graph holding only the configured identity and preferences
    pub fn new(config: GraphConfig) -> Self {
        let entities = EntityStore::new(&config.identity);
        let persistence = PersistenceManager::new(config.snapshot_path.clone());
        let clock = TurnClock::new(Utc::now());
        tracing::debug!(session_id = %clock.session_id, "World graph initialized");
        Self {
            config,
            entities,
            actions: ActionLog::new(),
            clock,
            intent: UserIntent::Casual,
            persistence,
        }
    }

    /// Graph restored from the configured snapshot, or fresh if there is none
    pub fn open(config: GraphConfig) -> Self {
        let mut graph = Self::new(config);
        graph.load();
        graph
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn turn(&self) -> u64 {
        self.clock.current_turn
    }

    pub fn session_id(&self) -> &str {
        &self.clock.session_id
    }

    pub fn clock(&self) -> &TurnClock {
        &self.clock
    }

    pub fn entity_store(&self) -> &EntityStore {
        &self.entities
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.actions
    }

    pub fn persistence(&self) -> &PersistenceManager {
        &self.persistence
    }

    // ---- entities ----

    pub fn get_or_create_entity(
        &mut self,
        entity_type: EntityType,
        name: &str,
        source: EntitySource,
        attributes: AttributeMap,
    ) -> Entity {
        self.entities
            .get_or_create(
                entity_type,
                name,
                source,
                attributes,
                Utc::now(),
                self.config.touch_confidence_boost,
            )
            .clone()
    }

    /// Returns false when `source` may not mutate the entity or the id is unknown
    pub fn update_entity(&mut self, id: &str, changes: AttributeMap, source: EntitySource) -> bool {
        self.entities.update(id, changes, source, Utc::now())
    }

    pub fn try_update_entity(
        &mut self,
        id: &str,
        changes: AttributeMap,
        source: EntitySource,
    ) -> Result<Entity> {
        self.entities
            .try_update(id, changes, source, Utc::now())
            .map(Entity::clone)
    }

    pub fn add_negative_claim(&mut self, id: &str, claim: &str, source: EntitySource) -> bool {
        self.entities.add_negative_claim(id, claim, source, Utc::now())
    }

    /// Insert a prebuilt entity; identity-typed entities are refused
    pub fn insert_entity(&mut self, entity: Entity) -> bool {
        self.entities.insert(entity)
    }

    // ---- actions ----

    pub fn record(
        &mut self,
        tool: Option<&str>,
        args: AttributeMap,
        result: Option<&str>,
        success: bool,
        kind: ActionKind,
    ) -> Action {
        let mut record = ActionRecord::new(kind).with_success(success);
        record.tool = tool.map(str::to_string);
        record.args = args;
        record.result = result.map(str::to_string);
        self.record_with(record)
    }

    pub fn record_with(&mut self, record: ActionRecord) -> Action {
        let ctx = RecordContext {
            turn: self.clock.current_turn,
            session_id: &self.clock.session_id,
            intent: self.intent,
            now: Utc::now(),
            boost: self.config.touch_confidence_boost,
            result_char_limit: self.config.result_char_limit,
        };
        self.actions.record(&mut self.entities, ctx, record).clone()
    }

    /// Append a prebuilt action as-is
    pub fn insert_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Most recent non-episode action, optionally for one tool
    pub fn last_action(&self, tool: Option<&str>) -> Option<&Action> {
        self.actions.last_action(tool)
    }

    pub fn set_satisfaction(&mut self, action_id: &str, satisfaction: f32) -> Result<()> {
        let action = self
            .actions
            .get_mut(action_id)
            .ok_or_else(|| GraphError::UnknownAction(action_id.to_string()))?;
        action.user_satisfaction = Some(satisfaction.clamp(0.0, 1.0));
        Ok(())
    }

    // ---- turns and sessions ----

    /// Label the user's latest message; later actions carry the label
    pub fn observe_user_input(&mut self, text: &str) -> UserIntent {
        self.intent = intent::infer_intent(text);
        tracing::debug!(intent = %self.intent, "Observed user input");
        self.intent
    }

    pub fn advance_turn(&mut self) -> TurnReport {
        self.advance_turn_at(Utc::now())
    }

    /// [`advance_turn`](Self::advance_turn) with an explicit clock
    pub fn advance_turn_at(&mut self, now: DateTime<Utc>) -> TurnReport {
        LifecycleManager::new(&self.config).advance_turn(
            &mut self.entities,
            &mut self.actions,
            &mut self.clock,
            now,
        )
    }

    /// Start a new session; earlier actions age into "long ago"
    pub fn start_new_session(&mut self) {
        self.clock.start_session(Utc::now());
        self.intent = UserIntent::Casual;
        tracing::info!(session_id = %self.clock.session_id, "Started new session");
    }

    pub fn stats(&self) -> GraphStats {
        let mut by_lifecycle = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for entity in self.entities.iter() {
            *by_lifecycle.entry(entity.lifecycle).or_insert(0) += 1;
            *by_type.entry(entity.entity_type).or_insert(0) += 1;
        }
        GraphStats {
            turn: self.clock.current_turn,
            session_id: self.clock.session_id.clone(),
            entities: self.entities.len(),
            by_lifecycle,
            by_type,
            actions: self.actions.len(),
            episodes: self.actions.iter().filter(|a| a.is_episode()).count(),
            key_facts: self.actions.iter().map(|a| a.key_facts.len()).sum(),
            intent: self.intent,
            last_compression_turn: self.clock.last_compression_turn,
        }
    }

    /// Point-in-time copy for read-mostly consumers
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            turn: self.clock.current_turn,
            session_id: self.clock.session_id.clone(),
            taken_at: Utc::now(),
            identity: self.entities.identity().clone(),
            entities: self
                .entities
                .others()
                .map(|e| (e.id.clone(), e.clone()))
                .collect(),
            actions: self
                .actions
                .recent_actions(self.config.snapshot_action_window)
                .to_vec(),
            focus_entity: self.focus_entity().map(|e| e.id.clone()),
            intent: self.intent,
            budgets: self.budgets(),
            stats: self.stats(),
        }
    }

    // ---- persistence ----

    /// Filtered view written by [`save`](Self::save)
    pub fn capture_envelope(&self) -> SnapshotEnvelope {
        SnapshotEnvelope::capture(
            &self.entities,
            &self.actions,
            &self.clock,
            self.config.persisted_action_limit,
        )
    }

    /// Atomically write the snapshot; the in-memory graph is unaffected by failure
    pub fn save(&self) -> Result<()> {
        let envelope = self.capture_envelope();
        match self.persistence.write(&envelope) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Failed to save world graph: {}", e);
                Err(e)
            }
        }
    }

    /// Replace in-memory state with the persisted snapshot.
    ///
    /// Never fails: unreadable or mismatched snapshots leave a fresh graph.
    /// Identity and preference entities always come from configuration.
    pub fn load(&mut self) -> LoadOutcome {
        let read = self.persistence.read();
        self.restore(read)
    }

    /// Apply the result of [`PersistenceManager::read`]
    pub(crate) fn restore(&mut self, read: Result<Option<SnapshotEnvelope>>) -> LoadOutcome {
        self.reset_state();

        match read {
            Ok(None) => LoadOutcome::NoSnapshot,
            Ok(Some(envelope)) => {
                self.clock.current_turn = envelope.current_turn;
                self.clock.last_compression_turn = envelope.current_turn;
                let (restorable, restored_actions) = envelope.into_restorable();
                let mut entities = 0;
                for entity in restorable {
                    if self.entities.insert(entity) {
                        entities += 1;
                    }
                }
                let actions = restored_actions.len();
                for action in restored_actions {
                    self.actions.push(action);
                }
                tracing::info!(
                    turn = self.clock.current_turn,
                    entities,
                    actions,
                    "Loaded world graph"
                );
                LoadOutcome::Restored {
                    turn: self.clock.current_turn,
                    entities,
                    actions,
                }
            }
            Err(e) => {
                tracing::warn!("Starting with a fresh world graph: {}", e);
                LoadOutcome::StartedFresh {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Delete the persisted snapshot and reinitialize everything.
    ///
    /// In-memory state is reset even when deleting the file fails.
    pub fn reset(&mut self) -> Result<()> {
        let deleted = self.persistence.delete();
        self.reset_state();
        tracing::info!("World graph reset");
        deleted.map(|_| ())
    }

    fn reset_state(&mut self) {
        self.entities.reinitialize(&self.config.identity);
        self.actions.clear();
        self.clock = TurnClock::new(Utc::now());
        self.intent = UserIntent::Casual;
    }
}

impl GraphView for WorldGraph {
    fn identity(&self) -> &Entity {
        self.entities.identity()
    }

    fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    fn entities(&self) -> Box<dyn Iterator<Item = &Entity> + '_> {
        Box::new(self.entities.iter())
    }

    fn actions(&self) -> &[Action] {
        self.actions.as_slice()
    }

    fn current_turn(&self) -> u64 {
        self.clock.current_turn
    }

    fn current_intent(&self) -> UserIntent {
        self.intent
    }

    fn budgets(&self) -> ContextBudgets {
        ContextBudgets {
            planner: self.config.planner_budget,
            responder: self.config.responder_budget,
        }
    }
}
