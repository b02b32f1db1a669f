//! Reference resolution
//!
//! Free-text references ("me", "it", "again", a name) resolve to an entity or
//! an action, first match wins:
//!
//! 1. self tokens (`me`, `myself`, `i`, `my`) → identity, 1.0
//! 2. self phrases ("who am i", "about me", ...) → identity, 1.0
//! 3. `again` / `repeat` → latest action, 0.95, follow-up repeat
//! 4. `this` / `that` / `it` → latest focus 0.9, first involved 0.75, the action 0.5
//! 5. `instead` → latest action with arguments, 0.85, follow-up modify-tool
//! 6. promoted entity name → 0.7
//! 7. nothing → 0.0 with a clarification
//!
//! Repetition is checked ahead of demonstratives so "play it again" repeats
//! the action instead of resolving "it" to the song.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::view::GraphView;
use crate::types::{Action, Entity, FollowUp, Lifecycle};

// Apostrophes split words so "i'm" and "i'll" still yield the "i" token
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").expect("valid regex"));

const SELF_TOKENS: &[&str] = &["me", "myself", "i", "my"];
const DEMONSTRATIVES: &[&str] = &["this", "that", "it"];
const REPEAT_WORDS: &[&str] = &["again", "repeat"];
const INSTEAD_WORDS: &[&str] = &["instead"];

/// Phrases that unambiguously ask about the user
pub const USER_PHRASES: &[&str] = &[
    "who am i",
    "about me",
    "about myself",
    "tell me about me",
    "my name",
    "my age",
    "my birthday",
    "my location",
    "what do you know about me",
    "describe me",
    "what have you stored about me",
    "what do you remember about me",
    "what's stored about me",
    "what info do you have on me",
    "what have you learned about me",
    "my profile",
    "my interests",
];

const NAME_CONTEXT: &[&str] = &["about", "tell me", "who is", "what about"];

/// Returned when nothing matches
pub const CLARIFICATION: &str = "I'm not sure what you're referring to. Could you clarify?";

const MAX_ALTERNATIVES: usize = 3;
const MAX_EDIT_DISTANCE: usize = 2;

/// Which rule produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    SelfToken,
    SelfPhrase,
    Repeat,
    Demonstrative,
    Instead,
    Name,
    Unresolved,
}

/// What a reference resolved to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedTarget {
    Entity(Box<Entity>),
    Action(Box<Action>),
}

/// Outcome of resolving a reference; never empty
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub target: Option<ResolvedTarget>,
    pub confidence: f32,
    pub rule: ResolutionRule,
    pub follow_up: Option<FollowUp>,
    /// Set for self references: the answer must come from the graph, not a web lookup
    pub external_lookup_forbidden: bool,
    pub clarification: Option<String>,
    /// Close entity names offered with a clarification
    pub alternatives: Vec<String>,
}

impl Resolution {
    fn entity(entity: &Entity, confidence: f32, rule: ResolutionRule) -> Self {
        Self {
            target: Some(ResolvedTarget::Entity(Box::new(entity.clone()))),
            confidence,
            rule,
            follow_up: None,
            external_lookup_forbidden: false,
            clarification: None,
            alternatives: Vec::new(),
        }
    }

    fn action(action: &Action, confidence: f32, rule: ResolutionRule) -> Self {
        Self {
            target: Some(ResolvedTarget::Action(Box::new(action.clone()))),
            confidence,
            rule,
            follow_up: None,
            external_lookup_forbidden: false,
            clarification: None,
            alternatives: Vec::new(),
        }
    }

    fn identity(entity: &Entity, rule: ResolutionRule) -> Self {
        Self {
            external_lookup_forbidden: true,
            ..Self::entity(entity, 1.0, rule)
        }
    }

    fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    fn unresolved(alternatives: Vec<String>) -> Self {
        let clarification = if alternatives.is_empty() {
            CLARIFICATION.to_string()
        } else {
            format!(
                "I'm not sure what you're referring to. Did you mean: {}?",
                alternatives.join(", ")
            )
        };
        Self {
            target: None,
            confidence: 0.0,
            rule: ResolutionRule::Unresolved,
            follow_up: None,
            external_lookup_forbidden: false,
            clarification: Some(clarification),
            alternatives,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match &self.target {
            Some(ResolvedTarget::Entity(e)) => Some(e),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match &self.target {
            Some(ResolvedTarget::Action(a)) => Some(a),
            _ => None,
        }
    }

    /// Id of the resolved entity or action
    pub fn target_id(&self) -> Option<&str> {
        match &self.target {
            Some(ResolvedTarget::Entity(e)) => Some(&e.id),
            Some(ResolvedTarget::Action(a)) => Some(&a.id),
            None => None,
        }
    }
}

/// Lower-cased word tokens
pub(crate) fn words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower).map(|m| m.as_str().to_string()).collect()
}

fn has_any(words: &[String], wanted: &[&str]) -> bool {
    words.iter().any(|w| wanted.contains(&w.as_str()))
}

/// Whether `phrase` appears in `haystack` on word boundaries (both normalized)
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    !phrase.is_empty() && format!(" {} ", haystack).contains(&format!(" {} ", phrase))
}

/// Resolve a free-text reference against a graph view
pub fn resolve<V: GraphView + ?Sized>(view: &V, text: &str) -> Resolution {
    let tokens = words(text);
    let lower = text.to_lowercase();

    if has_any(&tokens, SELF_TOKENS) {
        return Resolution::identity(view.identity(), ResolutionRule::SelfToken);
    }

    if USER_PHRASES.iter().any(|p| lower.contains(p)) {
        return Resolution::identity(view.identity(), ResolutionRule::SelfPhrase);
    }

    let latest = view.latest_action();

    if has_any(&tokens, REPEAT_WORDS) {
        if let Some(action) = latest {
            return Resolution::action(action, 0.95, ResolutionRule::Repeat)
                .with_follow_up(FollowUp::Repeat);
        }
    }

    if has_any(&tokens, DEMONSTRATIVES) {
        if let Some(action) = latest {
            if let Some(entity) = action.focus_entity.as_deref().and_then(|id| view.entity(id)) {
                return Resolution::entity(entity, 0.9, ResolutionRule::Demonstrative);
            }
            if let Some(entity) = action
                .entities_involved
                .first()
                .and_then(|id| view.entity(id))
            {
                return Resolution::entity(entity, 0.75, ResolutionRule::Demonstrative);
            }
            return Resolution::action(action, 0.5, ResolutionRule::Demonstrative);
        }
    }

    if has_any(&tokens, INSTEAD_WORDS) {
        if let Some(action) = latest.filter(|a| !a.args.is_empty()) {
            return Resolution::action(action, 0.85, ResolutionRule::Instead)
                .with_follow_up(FollowUp::ModifyTool);
        }
    }

    let normalized = tokens.join(" ");
    if let Some(entity) = match_promoted_name(view, &normalized) {
        return Resolution::entity(entity, 0.7, ResolutionRule::Name);
    }

    Resolution::unresolved(suggest_alternatives(view, &normalized, &tokens))
}

/// Exact whole-text name first, otherwise the longest promoted name
/// contained as a whole-word phrase
fn match_promoted_name<'a, V: GraphView + ?Sized>(
    view: &'a V,
    normalized: &str,
) -> Option<&'a Entity> {
    if normalized.is_empty() {
        return None;
    }

    let mut best: Option<(&Entity, usize)> = None;
    for entity in view.entities().filter(|e| e.lifecycle == Lifecycle::Promoted) {
        let name = words(&entity.name).join(" ");
        if name.is_empty() {
            continue;
        }
        if name == normalized {
            return Some(entity);
        }
        if contains_phrase(normalized, &name) {
            let len = name.chars().count();
            let better = match best {
                None => true,
                Some((current, current_len)) => {
                    len > current_len || (len == current_len && entity.id < current.id)
                }
            };
            if better {
                best = Some((entity, len));
            }
        }
    }
    best.map(|(entity, _)| entity)
}

fn suggest_alternatives<V: GraphView + ?Sized>(
    view: &V,
    normalized: &str,
    tokens: &[String],
) -> Vec<String> {
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, String)> = view
        .entities()
        .filter(|e| e.lifecycle == Lifecycle::Promoted && !e.is_protected())
        .filter_map(|e| {
            let name = e.name.to_lowercase();
            let whole = levenshtein::levenshtein(&name, normalized);
            let best = tokens
                .iter()
                .map(|t| levenshtein::levenshtein(&name, t))
                .min()
                .map_or(whole, |d| d.min(whole));
            (best <= MAX_EDIT_DISTANCE).then(|| (best, e.name.clone()))
        })
        .collect();

    scored.sort();
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(MAX_ALTERNATIVES)
        .map(|(_, name)| name)
        .collect()
}

/// Whether `text` asks about the user.
///
/// Explicit self phrases score 1.0. The user's name alongside an "about"-style
/// cue scores 0.75; the bare name only 0.3 and is not treated as a self reference.
pub fn is_user_reference<V: GraphView + ?Sized>(view: &V, text: &str) -> (bool, f32) {
    let lower = text.to_lowercase();
    if USER_PHRASES.iter().any(|p| lower.contains(p)) {
        return (true, 1.0);
    }

    let name = words(&view.identity().name).join(" ");
    if name.chars().count() < 2 {
        return (false, 0.0);
    }
    if contains_phrase(&words(text).join(" "), &name) {
        if NAME_CONTEXT.iter().any(|c| lower.contains(c)) {
            return (true, 0.75);
        }
        return (false, 0.3);
    }
    (false, 0.0)
}
