//! Episode compression
//!
//! Runs of old, low-significance actions collapse into one terminal episode.
//! Key facts carry over verbatim (capped, first seen first); everything else
//! survives only through the episode summary.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::GraphConfig;
use crate::graph::actions::ActionLog;
use crate::graph::entities::EntityStore;
use crate::types::{Action, ActionId, ActionKind, AttrValue, AttributeMap, EntityId, RecencyBucket};

/// Coarse engagement label for an interaction count
pub fn relationship_label(count: usize) -> &'static str {
    match count {
        c if c >= 5 => "loved",
        c if c >= 3 => "liked",
        _ => "mentioned",
    }
}

/// Result of a compression run that produced an episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionReport {
    pub episode_id: ActionId,
    pub compressed: usize,
    pub key_facts: usize,
    /// Focus entities that received engagement annotations
    pub annotated: Vec<EntityId>,
}

pub struct CompressionEngine<'a> {
    config: &'a GraphConfig,
}

impl<'a> CompressionEngine<'a> {
    pub fn new(config: &'a GraphConfig) -> Self {
        Self { config }
    }

    pub fn is_eligible(&self, action: &Action) -> bool {
        !action.is_episode()
            && action.recency_bucket == RecencyBucket::LongAgo
            && action.significance < self.config.compression_significance_threshold
    }

    /// Compress every eligible action into one episode.
    ///
    /// Returns `None` without touching the log when fewer than the minimum
    /// batch qualify.
    pub fn compress(
        &self,
        store: &mut EntityStore,
        log: &mut ActionLog,
    ) -> Option<CompressionReport> {
        let positions: Vec<usize> = log
            .iter()
            .enumerate()
            .filter(|(_, a)| self.is_eligible(a))
            .map(|(i, _)| i)
            .collect();

        if positions.len() < self.config.compression_min_batch.max(1) {
            tracing::debug!(
                eligible = positions.len(),
                min_batch = self.config.compression_min_batch,
                "Deferring compression"
            );
            return None;
        }

        let selected: Vec<&Action> = positions.iter().map(|&i| &log.as_slice()[i]).collect();
        let (first, last) = (*selected.first()?, *selected.last()?);

        let summaries: Vec<&str> = selected
            .iter()
            .map(|a| a.summary.as_str())
            .filter(|s| !s.is_empty())
            .take(self.config.episode_summary_limit)
            .collect();

        let mut key_facts: Vec<String> = Vec::new();
        for fact in selected.iter().flat_map(|a| a.key_facts.iter()) {
            if key_facts.len() >= self.config.episode_key_fact_limit {
                break;
            }
            if !key_facts.contains(fact) {
                key_facts.push(fact.clone());
            }
        }

        let mut tallies: BTreeMap<EntityId, BTreeMap<String, usize>> = BTreeMap::new();
        let mut focus_order: Vec<EntityId> = Vec::new();
        for action in &selected {
            if let Some(focus) = &action.focus_entity {
                *tallies
                    .entry(focus.clone())
                    .or_default()
                    .entry(action.interaction_label().to_string())
                    .or_default() += 1;
                if !focus_order.contains(focus) {
                    focus_order.push(focus.clone());
                }
            }
        }

        let mut episode = Action::new(
            format!("episode:{}-{}", first.turn, last.turn),
            last.turn,
            ActionKind::Episode,
            &first.session_id,
        );
        episode.timestamp = last.timestamp;
        episode.summary = format!("[EPISODE] {}", summaries.join("; "));
        episode.key_facts = key_facts;
        episode.entities_involved = focus_order
            .into_iter()
            .take(self.config.episode_key_fact_limit)
            .collect();
        episode.recency_bucket = RecencyBucket::LongAgo;
        episode.significance = 0.5;

        let compressed = positions.len();
        let report_facts = episode.key_facts.len();
        let episode_id = episode.id.clone();
        log.replace_with_episode(&positions, episode);

        let mut annotated = Vec::new();
        for (entity_id, counts) in tallies {
            let merged = merge_interactions(store, &entity_id, counts);
            let total: usize = merged.values().sum();
            let interaction_types: AttributeMap = merged
                .into_iter()
                .map(|(tool, n)| (tool, AttrValue::from(n)))
                .collect();
            let annotations: AttributeMap = [
                ("engagement_score".to_string(), AttrValue::from(total)),
                ("interaction_types".to_string(), AttrValue::Map(interaction_types)),
                (
                    "relationship".to_string(),
                    AttrValue::from(relationship_label(total)),
                ),
            ]
            .into_iter()
            .collect();
            if store.annotate(&entity_id, annotations) {
                annotated.push(entity_id);
            }
        }

        tracing::info!(
            episode_id = %episode_id,
            compressed,
            key_facts = report_facts,
            "Compressed actions into episode"
        );

        Some(CompressionReport {
            episode_id,
            compressed,
            key_facts: report_facts,
            annotated,
        })
    }
}

/// Add this run's counts to whatever earlier episodes recorded
fn merge_interactions(
    store: &EntityStore,
    entity_id: &str,
    mut counts: BTreeMap<String, usize>,
) -> BTreeMap<String, usize> {
    let previous = store
        .get(entity_id)
        .and_then(|e| e.attributes.get("interaction_types"));
    if let Some(AttrValue::Map(previous)) = previous {
        for (tool, value) in previous {
            if let Some(n) = value.as_f64() {
                *counts.entry(tool.clone()).or_default() += n.max(0.0) as usize;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::types::{attributes, AttributeMap, EntitySource, EntityType};

    fn old_action(i: u64, fact: Option<&str>, focus: Option<&str>) -> Action {
        let id = format!("action:t{}-{}", i, i + 1);
        let mut action = Action::new(id, i, ActionKind::ToolCall, "old");
        action.tool = Some("spotify_control".to_string());
        action.summary = format!("step {}", i);
        action.significance = 0.2;
        action.recency_bucket = RecencyBucket::LongAgo;
        action.focus_entity = focus.map(str::to_string);
        if let Some(fact) = fact {
            action.key_facts.push(fact.to_string());
        }
        action
    }

    #[test]
    fn test_relationship_labels() {
        assert_eq!(relationship_label(1), "mentioned");
        assert_eq!(relationship_label(3), "liked");
        assert_eq!(relationship_label(7), "loved");
    }

    #[test]
    fn test_defers_small_batches() {
        let config = GraphConfig::default();
        let mut store = EntityStore::new(&IdentityConfig::default());
        let mut log = ActionLog::new();
        for i in 0..4 {
            log.push(old_action(i, None, None));
        }
        assert!(CompressionEngine::new(&config).compress(&mut store, &mut log).is_none());
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_builds_episode_and_annotates_focus() {
        let config = GraphConfig::default();
        let mut store = EntityStore::new(&IdentityConfig::default());
        let song = store
            .get_or_create(
                EntityType::Song,
                "Numb",
                EntitySource::ToolResult,
                AttributeMap::new(),
                chrono::Utc::now(),
                0.05,
            )
            .id
            .clone();

        let mut log = ActionLog::new();
        let mut keep = old_action(0, None, None);
        keep.significance = 0.9;
        log.push(keep);
        for i in 1..7 {
            let fact = format!("Played: {}", i % 3);
            log.push(old_action(i, Some(&fact), Some(&song)));
        }

        let report = CompressionEngine::new(&config)
            .compress(&mut store, &mut log)
            .unwrap();
        assert_eq!(report.episode_id, "episode:1-6");
        assert_eq!(report.compressed, 6);
        assert_eq!(report.key_facts, 3);
        assert_eq!(report.annotated, vec![song.clone()]);

        assert_eq!(log.len(), 2);
        let episode = &log.as_slice()[1];
        assert!(episode.is_episode());
        assert_eq!(episode.summary, "[EPISODE] step 1; step 2; step 3; step 4; step 5");
        assert_eq!(episode.key_facts, vec!["Played: 1", "Played: 2", "Played: 0"]);

        let entity = store.get(&song).unwrap();
        assert_eq!(entity.attributes.get("relationship"), Some(&AttrValue::from("loved")));
        assert_eq!(
            entity.attributes.get("interaction_types"),
            Some(&AttrValue::Map(attributes([("spotify_control", 6usize)])))
        );

        // Episodes are terminal
        assert!(CompressionEngine::new(&config).compress(&mut store, &mut log).is_none());
    }
}
