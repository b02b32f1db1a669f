//! Descriptive user-intent labelling
//!
//! The label only shapes tone in the responder context; it never feeds
//! resolution, planning or trust decisions.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::UserIntent;

static FRUSTRATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(wrong|ugh|not what i|i said|i meant|that's not|thats not|doesn't work|didn't work|still not|why can't|why won't|forget it|never mind|useless)\b",
    )
    .expect("valid regex")
});

static URGENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(now|quick|quickly|asap|urgent|urgently|hurry|immediately|right away)\b")
        .expect("valid regex")
});

static CURIOUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(why|how does|how do|what is|what's|explain|tell me about|curious|wonder)\b")
        .expect("valid regex")
});

static PLAYFUL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(lol|haha|hehe|lmao|joke|funny)\b|😂|😄").expect("valid regex")
});

static TASK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(please )?(play|open|send|set|create|remind|schedule|search|find|launch|add|turn|call|email|book)\b",
    )
    .expect("valid regex")
});

/// Label the user's interaction state from their latest message
pub fn infer_intent(text: &str) -> UserIntent {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return UserIntent::Casual;
    }

    if FRUSTRATED.is_match(&lower) {
        UserIntent::Frustrated
    } else if URGENT.is_match(&lower) {
        UserIntent::Urgent
    } else if CURIOUS.is_match(&lower) {
        UserIntent::Curious
    } else if PLAYFUL.is_match(&lower) {
        UserIntent::Playful
    } else if TASK.is_match(&lower) {
        UserIntent::TaskFocused
    } else {
        UserIntent::Casual
    }
}

/// Tone guidance for the responder
pub fn intent_adjustment(intent: UserIntent) -> &'static str {
    match intent {
        UserIntent::Frustrated => {
            "User seems frustrated. Be brief, acknowledge the problem and fix it directly."
        }
        UserIntent::Urgent => "User is in a hurry. Lead with the answer, skip pleasantries.",
        UserIntent::Curious => "User is curious. A short explanation is welcome.",
        UserIntent::Playful => "User is playful. A light tone is fine.",
        UserIntent::TaskFocused => "User wants something done. Confirm the result in one line.",
        UserIntent::Casual => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_intent() {
        assert_eq!(infer_intent("ugh, that's wrong"), UserIntent::Frustrated);
        assert_eq!(infer_intent("set a timer right away"), UserIntent::Urgent);
        assert_eq!(infer_intent("how does a transformer work"), UserIntent::Curious);
        assert_eq!(infer_intent("haha nice one"), UserIntent::Playful);
        assert_eq!(infer_intent("play Numb by Linkin Park"), UserIntent::TaskFocused);
        assert_eq!(infer_intent("good evening"), UserIntent::Casual);
        assert_eq!(infer_intent("   "), UserIntent::Casual);
    }

    #[test]
    fn test_frustration_outranks_urgency() {
        assert_eq!(infer_intent("wrong song, fix it now"), UserIntent::Frustrated);
    }

    #[test]
    fn test_known_words_do_not_trip_urgency() {
        // "know" contains "now" but is not the word
        assert_eq!(infer_intent("you know the one"), UserIntent::Casual);
    }

    #[test]
    fn test_adjustment_blank_for_casual() {
        assert!(intent_adjustment(UserIntent::Casual).is_empty());
        assert!(!intent_adjustment(UserIntent::Frustrated).is_empty());
    }
}
