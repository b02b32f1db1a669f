//! Read-only view over the graph
//!
//! [`GraphView`] is implemented by the live [`WorldGraph`](super::WorldGraph)
//! and by [`GraphSnapshot`], so resolution and context assembly run the same
//! way against either.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context;
use super::resolver::{self, Resolution};
use super::validation::{self, Plan, PlanCheck};
use super::GraphStats;
use crate::types::{Action, Entity, EntityId, UserIntent};

/// Character budgets for prompt-injected context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudgets {
    pub planner: usize,
    pub responder: usize,
}

impl Default for ContextBudgets {
    fn default() -> Self {
        Self {
            planner: 500,
            responder: 1200,
        }
    }
}

pub trait GraphView {
    fn identity(&self) -> &Entity;

    fn entity(&self, id: &str) -> Option<&Entity>;

    /// Every visible entity, identity included
    fn entities(&self) -> Box<dyn Iterator<Item = &Entity> + '_>;

    /// Visible actions in log order
    fn actions(&self) -> &[Action];

    fn current_turn(&self) -> u64;

    fn current_intent(&self) -> UserIntent;

    fn budgets(&self) -> ContextBudgets;

    /// The last `n` actions in log order
    fn recent_actions(&self, n: usize) -> &[Action] {
        let actions = self.actions();
        &actions[actions.len().saturating_sub(n)..]
    }

    /// Most recent action that is not an episode
    fn latest_action(&self) -> Option<&Action> {
        self.actions().iter().rev().find(|a| !a.is_episode())
    }

    /// Focus entity of the most recent action, if it still exists
    fn focus_entity(&self) -> Option<&Entity> {
        self.latest_action()
            .and_then(|a| a.focus_entity.as_deref())
            .and_then(|id| self.entity(id))
    }

    fn resolve_reference(&self, text: &str) -> Resolution {
        resolver::resolve(self, text)
    }

    /// Whether `text` asks about the user, with a confidence
    fn is_user_reference(&self, text: &str) -> (bool, f32) {
        resolver::is_user_reference(self, text)
    }

    fn get_context_for_planner(&self, query: &str) -> String {
        context::planner_context(self, query, self.budgets().planner)
    }

    fn get_context_for_responder(&self) -> String {
        context::responder_context(self, self.budgets().responder)
    }

    fn summarize_recent_activity(&self, n: usize) -> String {
        context::summarize_recent_activity(self, n)
    }

    fn validate_plan(&self, plan: &Plan) -> PlanCheck {
        validation::validate_plan(self, plan)
    }

    /// Check a drafted response against what the graph knows about the user
    fn self_check(&self, response: &str) -> PlanCheck {
        validation::self_check(self, response)
    }
}

/// Point-in-time copy of the graph for read-mostly consumers
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub turn: u64,
    pub session_id: String,
    pub taken_at: DateTime<Utc>,
    pub identity: Entity,
    pub entities: HashMap<EntityId, Entity>,
    /// Tail of the action log
    pub actions: Vec<Action>,
    pub focus_entity: Option<EntityId>,
    pub intent: UserIntent,
    pub budgets: ContextBudgets,
    pub stats: GraphStats,
}

impl GraphView for GraphSnapshot {
    fn identity(&self) -> &Entity {
        &self.identity
    }

    fn entity(&self, id: &str) -> Option<&Entity> {
        if id == self.identity.id {
            return Some(&self.identity);
        }
        self.entities.get(id)
    }

    fn entities(&self) -> Box<dyn Iterator<Item = &Entity> + '_> {
        Box::new(std::iter::once(&self.identity).chain(self.entities.values()))
    }

    fn actions(&self) -> &[Action] {
        &self.actions
    }

    fn current_turn(&self) -> u64 {
        self.turn
    }

    fn current_intent(&self) -> UserIntent {
        self.intent
    }

    fn budgets(&self) -> ContextBudgets {
        self.budgets
    }
}
