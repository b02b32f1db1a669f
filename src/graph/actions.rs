//! Action log and per-tool inference tables
//!
//! Each recorded action gets a focus entity, a list of involved entities and
//! its key facts from fixed lookups keyed by tool name and argument key.
//! Tools outside the tables still get logged, just without a focus.

use chrono::{DateTime, Utc};

use super::entities::EntityStore;
use super::truncate_chars;
use crate::types::{
    Action, ActionId, ActionKind, AttrValue, AttributeMap, EntityId, EntitySource, EntityType,
    UserIntent,
};

/// Tool names that search outside the graph
pub const SEARCH_TOOLS: &[&str] = &["web_search", "arxiv_search", "search", "wikipedia"];

/// Argument keys that hold a search query
pub const QUERY_KEYS: &[&str] = &["query", "q", "search_query"];

const MEDIA_TOOLS: &[&str] = &["spotify_control", "play_music", "spotify", "play_song"];
const SONG_KEYS: &[&str] = &["song_name", "song", "track"];
const APP_TOOLS: &[&str] = &["open_app", "launch", "launch_app"];
const APP_KEYS: &[&str] = &["app_name", "app"];

struct FocusRule {
    tools: &'static [&'static str],
    keys: &'static [&'static str],
    entity_type: EntityType,
}

const FOCUS_RULES: &[FocusRule] = &[
    FocusRule {
        tools: MEDIA_TOOLS,
        keys: SONG_KEYS,
        entity_type: EntityType::Song,
    },
    FocusRule {
        tools: SEARCH_TOOLS,
        keys: QUERY_KEYS,
        entity_type: EntityType::Query,
    },
    FocusRule {
        tools: APP_TOOLS,
        keys: APP_KEYS,
        entity_type: EntityType::App,
    },
];

/// Common argument keys scanned on every tool call, in scan order
const INVOLVED_KEYS: &[(&str, EntityType)] = &[
    ("song_name", EntityType::Song),
    ("song", EntityType::Song),
    ("track", EntityType::Song),
    ("artist", EntityType::Artist),
    ("query", EntityType::Query),
    ("q", EntityType::Query),
    ("search_query", EntityType::Query),
    ("topic", EntityType::Topic),
];

struct KeyFactRule {
    tools: &'static [&'static str],
    keys: &'static [&'static str],
    label: &'static str,
}

const KEY_FACT_RULES: &[KeyFactRule] = &[
    KeyFactRule {
        tools: MEDIA_TOOLS,
        keys: SONG_KEYS,
        label: "Played",
    },
    KeyFactRule {
        tools: &["reminder_create", "create_reminder", "set_reminder"],
        keys: &["text", "reminder"],
        label: "Reminder",
    },
    KeyFactRule {
        tools: &["send_message", "send_whatsapp", "send_email", "gmail_send_email"],
        keys: &["to", "recipient"],
        label: "Sent message to",
    },
    KeyFactRule {
        tools: &["calendar_create_event", "create_event"],
        keys: &["title", "summary"],
        label: "Scheduled",
    },
    KeyFactRule {
        tools: &["add_task", "create_task", "tasks_create"],
        keys: &["title", "task"],
        label: "Task",
    },
];

/// First non-blank text argument among `keys`
fn first_text<'a>(args: &'a AttributeMap, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| args.get(*k))
        .filter_map(AttrValue::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Entity type and name a tool call is primarily about
pub fn infer_focus(tool: &str, args: &AttributeMap) -> Option<(EntityType, String)> {
    FOCUS_RULES
        .iter()
        .find(|rule| rule.tools.contains(&tool))
        .and_then(|rule| {
            first_text(args, rule.keys).map(|name| (rule.entity_type, name.to_string()))
        })
}

/// Facts from a tool call that must survive compression verbatim
pub fn extract_key_facts(tool: &str, args: &AttributeMap) -> Vec<String> {
    KEY_FACT_RULES
        .iter()
        .filter(|rule| rule.tools.contains(&tool))
        .filter_map(|rule| first_text(args, rule.keys).map(|v| format!("{}: {}", rule.label, v)))
        .collect()
}

/// One-line summary: `tool(k=v, k=v) ✓` or `Chat turn N`
pub fn summarize_action(
    kind: ActionKind,
    tool: Option<&str>,
    args: &AttributeMap,
    success: bool,
    turn: u64,
) -> String {
    match tool {
        Some(tool) => {
            let shown: Vec<String> = args
                .iter()
                .take(2)
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            let mark = if success { "✓" } else { "✗" };
            format!("{}({}) {}", tool, shown.join(", "), mark)
        }
        None => {
            let label = kind.as_str();
            let mut chars = label.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            };
            format!("{} turn {}", capitalized, turn)
        }
    }
}

/// Input for [`ActionLog::record`]
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub tool: Option<String>,
    pub args: AttributeMap,
    pub result: Option<String>,
    pub success: bool,
    pub depends_on: Option<ActionId>,
    pub significance: Option<f32>,
    pub user_satisfaction: Option<f32>,
    /// Facts supplied by the caller in addition to the tool templates
    pub key_facts: Vec<String>,
}

impl ActionRecord {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            tool: None,
            args: AttributeMap::new(),
            result: None,
            success: true,
            depends_on: None,
            significance: None,
            user_satisfaction: None,
            key_facts: Vec::new(),
        }
    }

    /// A successful tool call
    pub fn tool(name: impl Into<String>, args: AttributeMap) -> Self {
        Self {
            tool: Some(name.into()),
            args,
            ..Self::new(ActionKind::ToolCall)
        }
    }

    pub fn chat() -> Self {
        Self::new(ActionKind::Chat)
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn failed(self) -> Self {
        self.with_success(false)
    }

    pub fn depends_on(mut self, action_id: impl Into<ActionId>) -> Self {
        self.depends_on = Some(action_id.into());
        self
    }

    pub fn with_significance(mut self, significance: f32) -> Self {
        self.significance = Some(significance.clamp(0.0, 1.0));
        self
    }

    pub fn with_satisfaction(mut self, satisfaction: f32) -> Self {
        self.user_satisfaction = Some(satisfaction.clamp(0.0, 1.0));
        self
    }

    pub fn with_key_fact(mut self, fact: impl Into<String>) -> Self {
        self.key_facts.push(fact.into());
        self
    }
}

/// Per-call state supplied by the graph
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordContext<'a> {
    pub turn: u64,
    pub session_id: &'a str,
    pub intent: UserIntent,
    pub now: DateTime<Utc>,
    pub boost: f32,
    pub result_char_limit: usize,
}

/// Append-mostly sequence of actions
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    actions: Vec<Action>,
    next_seq: u64,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action, inferring its focus, involved entities and key facts
    pub(crate) fn record(
        &mut self,
        store: &mut EntityStore,
        ctx: RecordContext<'_>,
        record: ActionRecord,
    ) -> &Action {
        self.next_seq += 1;
        let id = format!("action:t{}-{}", ctx.turn, self.next_seq);
        let mut action = Action::new(id, ctx.turn, record.kind, ctx.session_id);
        action.timestamp = ctx.now;
        action.success = record.success;
        action.depends_on = record.depends_on;
        action.user_intent = ctx.intent;
        action.user_satisfaction = record.user_satisfaction;
        if let Some(significance) = record.significance {
            action.significance = significance;
        }
        action.result = record
            .result
            .map(|r| truncate_chars(&r, ctx.result_char_limit));

        if let Some(tool) = record.tool.as_deref() {
            let mut touched: Vec<EntityId> = Vec::new();

            if let Some((entity_type, name)) = infer_focus(tool, &record.args) {
                let id = store
                    .get_or_create(
                        entity_type,
                        &name,
                        EntitySource::ToolResult,
                        AttributeMap::new(),
                        ctx.now,
                        ctx.boost,
                    )
                    .id
                    .clone();
                action.focus_entity = Some(id.clone());
                touched.push(id);
            }

            for (key, entity_type) in INVOLVED_KEYS {
                let Some(name) = first_text(&record.args, &[*key]) else {
                    continue;
                };
                let id = crate::types::entity_id(*entity_type, name);
                if !touched.contains(&id) {
                    store.get_or_create(
                        *entity_type,
                        name,
                        EntitySource::ToolResult,
                        AttributeMap::new(),
                        ctx.now,
                        ctx.boost,
                    );
                    touched.push(id.clone());
                }
                if !action.entities_involved.contains(&id) {
                    action.entities_involved.push(id);
                }
            }

            if record.success {
                action.key_facts = extract_key_facts(tool, &record.args);
            }
        }

        for fact in record.key_facts {
            if !action.key_facts.contains(&fact) {
                action.key_facts.push(fact);
            }
        }

        action.summary = summarize_action(
            action.kind,
            record.tool.as_deref(),
            &record.args,
            action.success,
            ctx.turn,
        );
        action.tool = record.tool;
        action.args = record.args;

        tracing::debug!(
            action_id = %action.id,
            tool = action.tool.as_deref().unwrap_or("-"),
            focus = action.focus_entity.as_deref().unwrap_or("-"),
            "Recorded action"
        );

        self.actions.push(action);
        let last = self.actions.len() - 1;
        &self.actions[last]
    }

    /// Append a prebuilt action (snapshot restore, imports)
    pub fn push(&mut self, action: Action) {
        if let Some(seq) = action
            .id
            .rsplit('-')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.next_seq = self.next_seq.max(seq);
        }
        self.actions.push(action);
    }

    /// Most recent non-episode action, optionally restricted to one tool
    pub fn last_action(&self, tool: Option<&str>) -> Option<&Action> {
        self.actions
            .iter()
            .rev()
            .filter(|a| !a.is_episode())
            .find(|a| tool.map_or(true, |t| a.tool.as_deref() == Some(t)))
    }

    /// The last `n` actions in log order
    pub fn recent_actions(&self, n: usize) -> &[Action] {
        let start = self.actions.len().saturating_sub(n);
        &self.actions[start..]
    }

    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Action> {
        self.actions.iter_mut().find(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Action> {
        self.actions.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn as_slice(&self) -> &[Action] {
        &self.actions
    }

    /// Replace the actions at `positions` (ascending) with `episode`, placed
    /// where the first of them was
    pub(crate) fn replace_with_episode(&mut self, positions: &[usize], episode: Action) {
        let Some(&first) = positions.first() else {
            return;
        };
        let mut index = 0;
        let mut cursor = positions.iter().peekable();
        self.actions.retain(|_| {
            let drop = cursor.peek().is_some_and(|&&p| p == index);
            if drop {
                cursor.next();
            }
            index += 1;
            !drop
        });
        let at = first.min(self.actions.len());
        self.actions.insert(at, episode);
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        self.next_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::types::attributes;

    fn ctx(turn: u64) -> RecordContext<'static> {
        RecordContext {
            turn,
            session_id: "session-a",
            intent: UserIntent::Casual,
            now: Utc::now(),
            boost: 0.05,
            result_char_limit: 500,
        }
    }

    fn setup() -> (ActionLog, EntityStore) {
        (ActionLog::new(), EntityStore::new(&IdentityConfig::default()))
    }

    #[test]
    fn test_media_tool_focus_is_song() {
        let (mut log, mut store) = setup();
        let action = log
            .record(
                &mut store,
                ctx(1),
                ActionRecord::tool(
                    "spotify_control",
                    attributes([("action", "play"), ("song_name", "Numb")]),
                ),
            )
            .clone();

        assert_eq!(action.focus_entity.as_deref(), Some("entity:song:numb"));
        assert_eq!(action.entities_involved, vec!["entity:song:numb".to_string()]);
        assert_eq!(action.key_facts, vec!["Played: Numb".to_string()]);
        assert_eq!(action.summary, "spotify_control(action=play, song_name=Numb) ✓");
        // Focus and involved scan touch the song once
        assert_eq!(store.get("entity:song:numb").unwrap().reference_count, 1);
    }

    #[test]
    fn test_search_and_app_focus() {
        let (mut log, mut store) = setup();
        let search = ActionRecord::tool("web_search", attributes([("q", "rust actors")]));
        let search = log.record(&mut store, ctx(1), search).clone();
        assert_eq!(search.focus_entity.as_deref(), Some("entity:query:rust_actors"));

        let app = ActionRecord::tool("open_app", attributes([("app_name", "Notepad")]));
        let app = log.record(&mut store, ctx(2), app).clone();
        assert_eq!(app.focus_entity.as_deref(), Some("entity:app:notepad"));
        assert!(app.entities_involved.is_empty());
    }

    #[test]
    fn test_unknown_tool_has_no_focus_but_involves() {
        let (mut log, mut store) = setup();
        let action = log
            .record(
                &mut store,
                ctx(1),
                ActionRecord::tool(
                    "lyrics_lookup",
                    attributes([("song", "Numb"), ("artist", "Linkin Park")]),
                ),
            )
            .clone();
        assert!(action.focus_entity.is_none());
        assert_eq!(
            action.entities_involved,
            vec![
                "entity:song:numb".to_string(),
                "entity:artist:linkin_park".to_string()
            ]
        );
        assert!(action.key_facts.is_empty());
    }

    #[test]
    fn test_failed_call_keeps_no_template_facts() {
        let (mut log, mut store) = setup();
        let action = log
            .record(
                &mut store,
                ctx(1),
                ActionRecord::tool("send_message", attributes([("to", "Alex")]))
                    .failed()
                    .with_key_fact("Attempted message to Alex"),
            )
            .clone();
        assert!(!action.success);
        assert_eq!(action.key_facts, vec!["Attempted message to Alex".to_string()]);
        assert!(action.summary.ends_with('✗'));
    }

    #[test]
    fn test_result_truncated_and_chat_summary() {
        let (mut log, mut store) = setup();
        let long = "x".repeat(800);
        let action = log
            .record(&mut store, ctx(4), ActionRecord::chat().with_result(long))
            .clone();
        assert_eq!(action.result.as_ref().map(|r| r.chars().count()), Some(500));
        assert_eq!(action.summary, "Chat turn 4");
        assert_eq!(action.id, "action:t4-1");
    }

    #[test]
    fn test_last_action_filters_by_tool() {
        let (mut log, mut store) = setup();
        let search = ActionRecord::tool("web_search", attributes([("query", "a")]));
        log.record(&mut store, ctx(1), search);
        let open = ActionRecord::tool("open_app", attributes([("app", "b")]));
        log.record(&mut store, ctx(2), open);
        log.record(&mut store, ctx(3), ActionRecord::chat());

        assert_eq!(log.last_action(None).unwrap().turn, 3);
        assert_eq!(log.last_action(Some("web_search")).unwrap().turn, 1);
        assert!(log.last_action(Some("send_email")).is_none());
        assert_eq!(log.recent_actions(2).len(), 2);
        assert_eq!(log.recent_actions(10).len(), 3);
    }

    #[test]
    fn test_replace_with_episode_keeps_position() {
        let mut log = ActionLog::new();
        for i in 0..6 {
            log.push(Action::new(format!("action:t{}-{}", i, i + 1), i, ActionKind::Chat, "s"));
        }
        let episode = Action::new("episode:1-3", 3, ActionKind::Episode, "s");
        log.replace_with_episode(&[1, 2, 3], episode);

        let ids: Vec<&str> = log.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["action:t0-1", "episode:1-3", "action:t4-5", "action:t5-6"]);
    }

    #[test]
    fn test_push_advances_sequence() {
        let (mut log, mut store) = setup();
        log.push(Action::new("action:t9-41", 9, ActionKind::Chat, "old"));
        let action = log.record(&mut store, ctx(10), ActionRecord::chat());
        assert_eq!(action.id, "action:t10-42");
    }
}
