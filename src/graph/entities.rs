//! Entity storage with provenance-based mutation authority
//!
//! The identity entity lives outside the keyed map so there is always
//! exactly one of it and lookups never have to handle its absence.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::IdentityConfig;
use crate::error::{GraphError, Result};
use crate::types::{
    entity_id, AttrValue, AttributeMap, Entity, EntityId, EntitySource, EntityType, Lifecycle,
    IDENTITY_ID, PREFERENCE_ID,
};

/// Attribute keys written by compression; advisory only, kept out of summaries
pub const ADVISORY_KEYS: &[&str] = &["engagement_score", "interaction_types", "relationship"];

/// Initial lifecycle and confidence implied by a provenance source
pub fn initial_trust(source: EntitySource) -> (Lifecycle, f32) {
    match source {
        EntitySource::UserStated | EntitySource::UserConfirmed | EntitySource::System => {
            (Lifecycle::Promoted, 0.9)
        }
        EntitySource::ToolResult => (Lifecycle::Ephemeral, 0.6),
        EntitySource::ModelInferred | EntitySource::MemoryRecalled => (Lifecycle::Ephemeral, 0.3),
    }
}

/// Keyed storage of entities
#[derive(Debug, Clone)]
pub struct EntityStore {
    identity: Entity,
    entities: HashMap<EntityId, Entity>,
}

impl EntityStore {
    /// Create a store holding only the configured identity and preference entities
    pub fn new(identity: &IdentityConfig) -> Self {
        let mut store = Self {
            identity: build_identity(identity),
            entities: HashMap::new(),
        };
        let preference = build_preference(identity);
        store.entities.insert(preference.id.clone(), preference);
        store
    }

    /// Drop everything and rebuild identity/preferences from static configuration
    pub fn reinitialize(&mut self, identity: &IdentityConfig) {
        *self = Self::new(identity);
    }

    /// The single identity entity
    pub fn identity(&self) -> &Entity {
        &self.identity
    }

    pub(crate) fn identity_mut(&mut self) -> &mut Entity {
        &mut self.identity
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        if id == IDENTITY_ID {
            return Some(&self.identity);
        }
        self.entities.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        if id == IDENTITY_ID {
            return Some(&mut self.identity);
        }
        self.entities.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        id == IDENTITY_ID || self.entities.contains_key(id)
    }

    /// All entities, identity first
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        std::iter::once(&self.identity).chain(self.entities.values())
    }

    /// Entities other than the identity
    pub fn others(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub(crate) fn others_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Number of entities including the identity
    pub fn len(&self) -> usize {
        self.entities.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Find an existing entity by type + name or create it.
    ///
    /// Existing entities are touched. New ones start at the lifecycle and
    /// confidence implied by `source`; creation counts as the first reference.
    /// Asking for the identity type always yields the single identity entity.
    pub fn get_or_create(
        &mut self,
        entity_type: EntityType,
        name: &str,
        source: EntitySource,
        attributes: AttributeMap,
        now: DateTime<Utc>,
        boost: f32,
    ) -> &Entity {
        if entity_type == EntityType::IdentityUser {
            self.identity.touch(now, boost);
            return &self.identity;
        }

        match self.entities.entry(entity_id(entity_type, name)) {
            Entry::Occupied(slot) => {
                let entity = slot.into_mut();
                entity.touch(now, boost);
                entity
            }
            Entry::Vacant(slot) => {
                let (lifecycle, confidence) = initial_trust(source);
                let mut entity =
                    Entity::new(entity_type, name.trim(), source, lifecycle, confidence);
                entity.id = slot.key().clone();
                entity.attributes = attributes;
                entity.created_at = now;
                entity.last_referenced = now;
                entity.reference_count = 1;
                entity.summary = entity_summary(&entity);

                tracing::debug!(
                    entity_id = %entity.id,
                    lifecycle = %lifecycle,
                    source = %source,
                    "Created entity"
                );
                slot.insert(entity)
            }
        }
    }

    /// Apply attribute changes on behalf of `source`.
    ///
    /// The identity entity only accepts user sources, whatever its stored
    /// authority set says.
    pub fn try_update(
        &mut self,
        id: &str,
        changes: AttributeMap,
        source: EntitySource,
        now: DateTime<Utc>,
    ) -> Result<&Entity> {
        let entity = self.authorized_mut(id, source)?;
        for (key, value) in changes {
            entity.attributes.insert(key, value);
        }
        entity.last_referenced = now;
        entity.summary = entity_summary(entity);
        tracing::debug!(entity_id = %id, source = %source, "Updated entity");
        Ok(&*entity)
    }

    /// [`try_update`](Self::try_update) for callers that only need to know whether it applied
    pub fn update(
        &mut self,
        id: &str,
        changes: AttributeMap,
        source: EntitySource,
        now: DateTime<Utc>,
    ) -> bool {
        match self.try_update(id, changes, source, now) {
            Ok(_) => true,
            Err(e) => {
                log_rejection(&e);
                false
            }
        }
    }

    /// Record something that must never be asserted about an entity
    pub fn add_negative_claim(
        &mut self,
        id: &str,
        claim: &str,
        source: EntitySource,
        now: DateTime<Utc>,
    ) -> bool {
        let claim = claim.trim();
        if claim.is_empty() {
            return false;
        }
        match self.authorized_mut(id, source) {
            Ok(entity) => {
                if !entity.not_claims.iter().any(|c| c.eq_ignore_ascii_case(claim)) {
                    entity.not_claims.push(claim.to_string());
                }
                entity.last_referenced = now;
                entity.summary = entity_summary(entity);
                true
            }
            Err(e) => {
                log_rejection(&e);
                false
            }
        }
    }

    fn authorized_mut(&mut self, id: &str, source: EntitySource) -> Result<&mut Entity> {
        if id == IDENTITY_ID && !source.is_user() {
            return Err(GraphError::MutationRejected {
                entity_id: id.to_string(),
                by: source,
            });
        }
        let entity = self
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownEntity(id.to_string()))?;
        if !entity.can_be_mutated_by(source) {
            return Err(GraphError::MutationRejected {
                entity_id: id.to_string(),
                by: source,
            });
        }
        Ok(entity)
    }

    /// Write advisory metadata (compression engagement tallies) without authority checks
    pub(crate) fn annotate(&mut self, id: &str, annotations: AttributeMap) -> bool {
        match self.entities.get_mut(id) {
            Some(entity) if !entity.is_protected() => {
                entity.attributes.extend(annotations);
                entity.summary = entity_summary(entity);
                true
            }
            _ => false,
        }
    }

    /// Insert a prebuilt entity (snapshot restore, imports).
    ///
    /// Identity-typed entities are refused: the identity only comes from configuration.
    pub fn insert(&mut self, mut entity: Entity) -> bool {
        if entity.is_identity() || entity.id == IDENTITY_ID {
            return false;
        }
        if entity.summary.is_empty() {
            entity.summary = entity_summary(&entity);
        }
        self.entities.insert(entity.id.clone(), entity);
        true
    }

    /// Remove an entity; the identity cannot be removed
    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        self.entities.remove(id)
    }

    /// Case-insensitive exact name lookup among promoted entities
    pub fn find_promoted_by_name(&self, name: &str) -> Option<&Entity> {
        let wanted = name.trim().to_lowercase();
        self.iter()
            .find(|e| e.lifecycle == Lifecycle::Promoted && e.name.to_lowercase() == wanted)
    }
}

fn log_rejection(err: &GraphError) {
    match err {
        GraphError::MutationRejected { entity_id, by } => {
            tracing::warn!(entity_id = %entity_id, source = %by, "Blocked entity mutation");
        }
        other => tracing::warn!("Entity mutation skipped: {}", other),
    }
}

fn build_identity(config: &IdentityConfig) -> Entity {
    let mut identity = Entity::new(
        EntityType::IdentityUser,
        config.name.trim(),
        EntitySource::System,
        Lifecycle::Promoted,
        1.0,
    );
    identity.id = IDENTITY_ID.to_string();
    identity.attributes = config.attributes.clone();
    identity.not_claims = config.not_claims.clone();
    identity.summary = entity_summary(&identity);
    identity
}

fn build_preference(config: &IdentityConfig) -> Entity {
    let mut pref = Entity::new(
        EntityType::Preference,
        "Communication Preferences",
        EntitySource::System,
        Lifecycle::Promoted,
        1.0,
    );
    pref.id = PREFERENCE_ID.to_string();
    pref.attributes = config.preferences.clone();
    pref.summary = if config.preference_summary.trim().is_empty() {
        entity_summary(&pref)
    } else {
        config.preference_summary.clone()
    };
    pref
}

/// Human-readable summary of an entity
pub fn entity_summary(entity: &Entity) -> String {
    if entity.is_identity() {
        return identity_summary(entity);
    }

    let attrs: Vec<String> = entity
        .attributes
        .iter()
        .filter(|(k, v)| !ADVISORY_KEYS.contains(&k.as_str()) && !v.is_blank())
        .take(3)
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect();

    if attrs.is_empty() {
        format!("{} ({})", entity.name, entity.entity_type)
    } else {
        format!("{} ({}). {}", entity.name, entity.entity_type, attrs.join(", "))
    }
}

fn identity_summary(identity: &Entity) -> String {
    let mut summary = identity.name.clone();
    let attr = |key: &str| identity.attributes.get(key).filter(|v| !v.is_blank());

    if let Some(age) = attr("age") {
        summary.push_str(&format!(", {}", age));
    }
    if let Some(location) = attr("location") {
        summary.push_str(&format!(", from {}", location));
    }
    summary.push('.');
    if let Some(interests) = attr("interests") {
        summary.push_str(&format!(" Interests: {}.", interests));
    }

    let extra: Vec<String> = identity
        .attributes
        .iter()
        .filter(|(k, v)| !matches!(k.as_str(), "age" | "location" | "interests") && !v.is_blank())
        .map(|(k, v)| match v {
            AttrValue::Map(_) => k.replace('_', " "),
            _ => format!("{}: {}", k.replace('_', " "), v),
        })
        .collect();
    if !extra.is_empty() {
        summary.push_str(&format!(" {}.", extra.join("; ")));
    }
    summary
}
