//! Bounded context strings for prompt injection

use super::intent::intent_adjustment;
use super::resolver::ResolvedTarget;
use super::truncate_chars;
use super::view::GraphView;
use crate::types::{UserIntent, PREFERENCE_ID};

const RECENT_IN_PLANNER: usize = 3;
const LAST_RESULT_CHARS: usize = 200;

/// Cut `text` to at most `budget` characters, marking the cut with "..."
pub fn fit_budget(text: String, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text;
    }
    let mut cut = truncate_chars(&text, budget.saturating_sub(3));
    cut.push_str("...");
    cut
}

/// Context for the planner: what the query refers to, recent actions, who the user is
pub fn planner_context<V: GraphView + ?Sized>(view: &V, query: &str, budget: usize) -> String {
    let mut parts = Vec::new();

    if !query.trim().is_empty() {
        let resolution = view.resolve_reference(query);
        if resolution.confidence > 0.5 {
            match &resolution.target {
                Some(ResolvedTarget::Entity(entity)) => {
                    parts.push(format!("[RESOLVED] Entity: {} ({})", entity.name, entity.summary));
                }
                Some(ResolvedTarget::Action(action)) => {
                    let label = action.tool.as_deref().unwrap_or(action.kind.as_str());
                    parts.push(format!("[RESOLVED] Last action: {} - {}", label, action.summary));
                }
                None => {}
            }
        }
    }

    let recent: Vec<String> = view
        .recent_actions(RECENT_IN_PLANNER)
        .iter()
        .map(|a| format!("T{}: {}", a.turn, a.summary))
        .collect();
    if !recent.is_empty() {
        parts.push(format!("[RECENT] {}", recent.join("; ")));
    }

    parts.push(format!("[USER] {}", view.identity().summary));

    fit_budget(parts.join("\n"), budget)
}

/// Context for the responder: identity, preferences, the last action and the user's state
pub fn responder_context<V: GraphView + ?Sized>(view: &V, budget: usize) -> String {
    let mut sections = Vec::new();

    let identity = view.identity();
    let mut who = format!("[USER IDENTITY]\n{}", identity.summary);
    if !identity.not_claims.is_empty() {
        who.push_str(&format!("\nNever claim: {}", identity.not_claims.join("; ")));
    }
    sections.push(who);

    if let Some(pref) = view.entity(PREFERENCE_ID) {
        sections.push(format!("[PREFERENCES]\n{}", pref.summary));
    }

    if let Some(action) = view.latest_action() {
        let mut last = format!("[LAST ACTION]\n{}", action.summary);
        if let Some(result) = action.result.as_deref().filter(|r| !r.is_empty()) {
            last.push_str(&format!("\nResult: {}", truncate_chars(result, LAST_RESULT_CHARS)));
        }
        sections.push(last);
    }

    let intent = view.current_intent();
    if intent != UserIntent::Casual {
        sections.push(format!("[USER STATE]\n{}", intent_adjustment(intent)));
    }

    fit_budget(sections.join("\n\n"), budget)
}

/// Short digest of the last `n` actions, episodes included
pub fn summarize_recent_activity<V: GraphView + ?Sized>(view: &V, n: usize) -> String {
    let recent = view.recent_actions(n);
    if recent.is_empty() {
        return "No recent activity.".to_string();
    }

    let mut lines = vec!["Recent activity:".to_string()];
    for action in recent {
        let mut line = format!("- T{}: {}", action.turn, action.summary);
        if !action.key_facts.is_empty() {
            line.push_str(&format!(" [{}]", action.key_facts.join("; ")));
        }
        lines.push(line);
    }
    lines.join("\n")
}
