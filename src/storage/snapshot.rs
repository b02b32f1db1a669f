//! Versioned snapshot envelope

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::actions::ActionLog;
use crate::graph::entities::EntityStore;
use crate::lifecycle::TurnClock;
use crate::types::{Action, Entity, EntityId, Lifecycle};

/// Snapshots with any other version are discarded on load
pub const SNAPSHOT_VERSION: &str = "v7";

/// `{version, current_turn, current_session, entities, actions}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub version: String,
    pub current_turn: u64,
    pub current_session: String,
    #[serde(default)]
    pub entities: BTreeMap<EntityId, Entity>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl SnapshotEnvelope {
    /// Non-ephemeral entities (configured identity and preferences always) plus the
    /// last `action_limit` actions
    pub fn capture(
        store: &EntityStore,
        log: &ActionLog,
        clock: &TurnClock,
        action_limit: usize,
    ) -> Self {
        let entities = store
            .iter()
            .filter(|e| e.is_protected() || e.lifecycle != Lifecycle::Ephemeral)
            .map(|e| (e.id.clone(), e.clone()))
            .collect();

        Self {
            version: SNAPSHOT_VERSION.to_string(),
            current_turn: clock.current_turn,
            current_session: clock.session_id.clone(),
            entities,
            actions: log.recent_actions(action_limit).to_vec(),
        }
    }

    /// Entities safe to restore plus the actions.
    ///
    /// Identity and preference entities are dropped; they are rebuilt from
    /// configuration instead.
    pub fn into_restorable(self) -> (Vec<Entity>, Vec<Action>) {
        let entities = self
            .entities
            .into_values()
            .filter(|e| !e.is_protected() && !e.is_identity())
            .collect();
        (entities, self.actions)
    }
}
