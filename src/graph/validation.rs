//! Plan and response validation against graph-held facts
//!
//! A plan is vetoed when a step sends the user's own identity to an external
//! lookup, or when its arguments would assert a recorded negative claim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::actions::{QUERY_KEYS, SEARCH_TOOLS};
use super::view::GraphView;
use crate::types::{AttrValue, AttributeMap};

static LOCATION_CLAIM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\byou(?: live in| are from|'re from| are based in) ([a-z]+(?: [a-z]+){0,2})\b")
        .expect("valid regex")
});

/// Words that end a place name inside a longer clause
const CLAUSE_BREAKS: &[&str] = &[
    "and", "but", "so", "or", "where", "which", "with", "because", "since", "now", "right",
];

/// Place named by a location claim, cut at the first clause break
fn claimed_place(raw: &str) -> String {
    raw.split_whitespace()
        .take_while(|w| !CLAUSE_BREAKS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `claimed` is compatible with the stored location, e.g. "bangalore"
/// against "bangalore, india"
fn same_place(claimed: &str, location: &str) -> bool {
    location.contains(claimed)
        || claimed.contains(location)
        || location
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .any(|part| claimed.starts_with(part))
}

/// One planned tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub tool: String,
    #[serde(default)]
    pub args: AttributeMap,
}

impl PlanStep {
    pub fn new(tool: impl Into<String>, args: AttributeMap) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// Planner output: `{"plan": [{"tool": ..., "args": {...}}]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "plan", default)]
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }
}

/// Outcome of a plan or response check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanCheck {
    pub ok: bool,
    pub reason: Option<String>,
}

impl PlanCheck {
    pub fn approved() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn vetoed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }

    pub fn into_tuple(self) -> (bool, Option<String>) {
        (self.ok, self.reason)
    }
}

/// Phrase a negative claim forbids, e.g. "NOT a public figure" → "a public figure"
fn forbidden_phrase(claim: &str) -> String {
    let lower = claim.trim().to_lowercase();
    lower
        .strip_prefix("not ")
        .unwrap_or(&lower)
        .trim()
        .to_string()
}

fn args_text(args: &AttributeMap) -> String {
    args.values()
        .map(AttrValue::to_string)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether `text` asserts `phrase` (an occurrence not directly negated)
fn asserts(text: &str, phrase: &str) -> bool {
    if phrase.chars().count() < 3 {
        return false;
    }
    text.match_indices(phrase).any(|(at, _)| !text[..at].ends_with("not "))
}

pub fn validate_plan<V: GraphView + ?Sized>(view: &V, plan: &Plan) -> PlanCheck {
    for step in &plan.steps {
        if SEARCH_TOOLS.contains(&step.tool.as_str()) {
            let query = QUERY_KEYS
                .iter()
                .filter_map(|k| step.args.get(*k))
                .filter_map(AttrValue::as_str)
                .find(|q| !q.trim().is_empty());
            if let Some(query) = query {
                let (_, confidence) = view.is_user_reference(query);
                if confidence > 0.5 {
                    tracing::warn!(tool = %step.tool, "Vetoed external lookup of user identity");
                    return PlanCheck::vetoed(format!(
                        "{} would look up the user externally ('{}'); answer from the graph instead",
                        step.tool, query
                    ));
                }
            }
        }

        let text = args_text(&step.args);
        for entity in view.entities() {
            for claim in &entity.not_claims {
                let phrase = forbidden_phrase(claim);
                if asserts(&text, &phrase) {
                    tracing::warn!(
                        tool = %step.tool,
                        entity_id = %entity.id,
                        "Vetoed plan asserting a negative claim"
                    );
                    return PlanCheck::vetoed(format!(
                        "{} would assert '{}' about {}, recorded as: {}",
                        step.tool, phrase, entity.name, claim
                    ));
                }
            }
        }
    }
    PlanCheck::approved()
}

/// Check a drafted response for contradictions with the identity entity
pub fn self_check<V: GraphView + ?Sized>(view: &V, response: &str) -> PlanCheck {
    let lower = response.to_lowercase();
    let identity = view.identity();

    for claim in &identity.not_claims {
        let phrase = forbidden_phrase(claim);
        if asserts(&lower, &phrase) {
            return PlanCheck::vetoed(format!(
                "Response asserts '{}', recorded as: {}",
                phrase, claim
            ));
        }
    }

    let location = identity
        .attributes
        .get("location")
        .map(|v| v.to_string().to_lowercase());
    if let Some(location) = location {
        for capture in LOCATION_CLAIM.captures_iter(&lower) {
            let claimed = claimed_place(&capture[1]);
            if claimed.is_empty() {
                continue;
            }
            if !same_place(&claimed, &location) {
                return PlanCheck::vetoed(format!(
                    "Response places the user in '{}', but their location is {}",
                    claimed, location
                ));
            }
        }
    }

    PlanCheck::approved()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphConfig, IdentityConfig};
    use crate::graph::WorldGraph;
    use crate::types::attributes;

    fn graph() -> WorldGraph {
        let mut config = GraphConfig::in_memory();
        config.identity = IdentityConfig {
            name: "Dana".to_string(),
            attributes: attributes([("location", AttrValue::from("Bangalore, India"))]),
            not_claims: vec!["NOT the actor Dana Rao".to_string()],
            ..IdentityConfig::default()
        };
        WorldGraph::new(config)
    }

    #[test]
    fn test_plan_json_shape() {
        let plan: Plan = serde_json::from_str(
            r#"{"plan": [{"tool": "web_search", "args": {"query": "rust"}}, {"tool": "get_time"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.steps[1].args.is_empty());
    }

    #[test]
    fn test_vetoes_identity_search() {
        let g = graph();
        let plan = Plan::new(vec![PlanStep::new(
            "web_search",
            attributes([("query", "what do you know about me")]),
        )]);
        let check = g.validate_plan(&plan);
        assert!(!check.ok);
        assert!(check.reason.unwrap().contains("web_search"));

        let plan = Plan::new(vec![PlanStep::new(
            "web_search",
            attributes([("q", "tell me about Dana")]),
        )]);
        assert!(!g.validate_plan(&plan).ok);
    }

    #[test]
    fn test_allows_ordinary_plans() {
        let g = graph();
        let plan = Plan::new(vec![
            PlanStep::new("web_search", attributes([("query", "weather in Bangalore")])),
            PlanStep::new("spotify_control", attributes([("song_name", "Numb")])),
        ]);
        assert_eq!(g.validate_plan(&plan).into_tuple(), (true, None));
        // Name alone is not a self reference
        let plan = Plan::new(vec![PlanStep::new(
            "web_search",
            attributes([("query", "Dana")]),
        )]);
        assert!(g.validate_plan(&plan).ok);
    }

    #[test]
    fn test_vetoes_negative_claim_assertion() {
        let g = graph();
        let plan = Plan::new(vec![PlanStep::new(
            "send_message",
            attributes([("to", "Alex"), ("text", "Dana is the actor Dana Rao!")]),
        )]);
        let check = g.validate_plan(&plan);
        assert!(!check.ok);
        assert!(check.reason.unwrap().contains("the actor dana rao"));
    }

    #[test]
    fn test_self_check() {
        let g = graph();
        assert!(g.self_check("Sure, playing Numb now.").ok);
        assert!(!g.self_check("As the actor Dana Rao, you must be busy").ok);
        assert!(g.self_check("You are not the actor Dana Rao.").ok);
        assert!(g.self_check("Since you live in Bangalore, carry an umbrella").ok);
        assert!(!g.self_check("Since you live in Chennai, carry an umbrella").ok);
    }

    #[test]
    fn test_self_check_location_inside_longer_clause() {
        let g = graph();
        assert!(
            g.self_check("Since you live in Bangalore and it rains a lot, carry an umbrella")
                .ok
        );
        assert!(g.self_check("You are based in Bangalore so the time is IST").ok);
        assert!(g.self_check("You're from India, right?").ok);

        let check = g.self_check("Since you live in Chennai and it rains a lot, stay dry");
        assert!(!check.ok);
        assert!(check.reason.unwrap().contains("'chennai'"));
    }
}
