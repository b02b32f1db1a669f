//! Bounded eviction of untrusted and stale entities
//!
//! Identity and preference entities are never collected.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::GraphConfig;
use crate::graph::entities::EntityStore;
use crate::types::{EntityId, Lifecycle};

/// Entities removed by one collection, per pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GcReport {
    pub ephemeral: Vec<EntityId>,
    pub stale_candidates: Vec<EntityId>,
    pub over_cap: Vec<EntityId>,
}

impl GcReport {
    pub fn total(&self) -> usize {
        self.ephemeral.len() + self.stale_candidates.len() + self.over_cap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

pub struct GarbageCollector<'a> {
    config: &'a GraphConfig,
}

impl<'a> GarbageCollector<'a> {
    pub fn new(config: &'a GraphConfig) -> Self {
        Self { config }
    }

    pub fn collect(&self, store: &mut EntityStore, now: DateTime<Utc>) -> GcReport {
        let mut report = GcReport::default();
        let ephemeral_idle = Duration::seconds(self.config.ephemeral_idle_secs);
        let candidate_idle = Duration::days(self.config.candidate_idle_days);

        for entity in store.others().filter(|e| !e.is_protected()) {
            let idle = now - entity.last_referenced;
            match entity.lifecycle {
                Lifecycle::Ephemeral
                    if idle > ephemeral_idle
                        && entity.reference_count < self.config.ephemeral_min_references =>
                {
                    report.ephemeral.push(entity.id.clone());
                }
                Lifecycle::Candidate if idle > candidate_idle => {
                    report.stale_candidates.push(entity.id.clone());
                }
                _ => {}
            }
        }

        let marked: HashSet<&EntityId> = report
            .ephemeral
            .iter()
            .chain(report.stale_candidates.iter())
            .collect();

        let mut over_cap = Vec::new();
        for (&entity_type, &cap) in &self.config.type_caps {
            let mut population: Vec<(DateTime<Utc>, &EntityId)> = store
                .others()
                .filter(|e| e.entity_type == entity_type && !e.is_protected())
                .filter(|e| !marked.contains(&e.id))
                .map(|e| (e.last_referenced, &e.id))
                .collect();
            if population.len() <= cap {
                continue;
            }
            population.sort();
            let excess = population.len() - cap;
            over_cap.extend(population.into_iter().take(excess).map(|(_, id)| id.clone()));
        }
        report.over_cap = over_cap;

        for id in report
            .ephemeral
            .iter()
            .chain(&report.stale_candidates)
            .chain(&report.over_cap)
        {
            store.remove(id);
        }

        if !report.is_empty() {
            tracing::info!(
                ephemeral = report.ephemeral.len(),
                stale_candidates = report.stale_candidates.len(),
                over_cap = report.over_cap.len(),
                "Collected entities"
            );
        }
        report
    }
}
