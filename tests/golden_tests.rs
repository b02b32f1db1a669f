//! Golden tests - fixture-based tests that lock expected behavior
//!
//! These tests use JSON fixtures to verify that reference resolution produces
//! expected outputs. Any change in behavior will cause these tests to fail,
//! signaling a potential breaking change.
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::fs;

use worldgraph::types::{attributes, AttributeMap};
use worldgraph::{
    ActionKind, EntitySource, EntityType, GraphConfig, GraphView, IdentityConfig, WorldGraph,
};

#[derive(Debug, Deserialize)]
struct ResolutionCase {
    name: String,
    input: String,
    rule: String,
    target: Option<String>,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct UserReferenceCase {
    name: String,
    input: String,
    is_user: bool,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    identity_name: String,
    resolution_cases: Vec<ResolutionCase>,
    user_reference_cases: Vec<UserReferenceCase>,
}

fn load_fixture() -> Fixture {
    let fixture_path = concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/reference_resolution.json"
    );
    let content = fs::read_to_string(fixture_path)
        .expect("Failed to read reference_resolution.json fixture");
    serde_json::from_str(&content).expect("Failed to parse fixture JSON")
}

/// Promoted artist, then one media action whose focus is an ephemeral song
fn seeded_graph(identity_name: &str) -> WorldGraph {
    let mut config = GraphConfig::in_memory();
    config.identity = IdentityConfig {
        name: identity_name.to_string(),
        ..IdentityConfig::default()
    };
    let mut graph = WorldGraph::new(config);
    graph.get_or_create_entity(
        EntityType::Artist,
        "Linkin Park",
        EntitySource::UserStated,
        AttributeMap::new(),
    );
    graph.record(
        Some("spotify_control"),
        attributes([("action", "play"), ("song_name", "Numb")]),
        Some("Playing Numb"),
        true,
        ActionKind::ToolCall,
    );
    graph
}

#[test]
fn test_reference_resolution_golden() {
    let fixture = load_fixture();
    let graph = seeded_graph(&fixture.identity_name);

    for case in fixture.resolution_cases {
        let resolution = graph.resolve_reference(&case.input);
        let rule = serde_json::to_value(resolution.rule).unwrap();

        assert_eq!(
            rule.as_str(),
            Some(case.rule.as_str()),
            "Case '{}': rule mismatch for input {:?}",
            case.name,
            case.input
        );
        assert_eq!(
            resolution.target_id(),
            case.target.as_deref(),
            "Case '{}': target mismatch",
            case.name
        );
        assert!(
            (resolution.confidence - case.confidence).abs() < 1e-6,
            "Case '{}': expected confidence {}, got {}",
            case.name,
            case.confidence,
            resolution.confidence
        );
        if case.target.is_none() {
            assert!(
                resolution.clarification.is_some(),
                "Case '{}': unresolved without clarification",
                case.name
            );
        }
    }
}

#[test]
fn test_user_reference_golden() {
    let fixture = load_fixture();
    let graph = seeded_graph(&fixture.identity_name);

    for case in fixture.user_reference_cases {
        let (is_user, confidence) = graph.is_user_reference(&case.input);
        assert_eq!(is_user, case.is_user, "Case '{}': flag mismatch", case.name);
        assert!(
            (confidence - case.confidence).abs() < 1e-6,
            "Case '{}': expected confidence {}, got {}",
            case.name,
            case.confidence,
            confidence
        );
    }
}
