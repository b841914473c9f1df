//! Loop and runaway detectors
//!
//! Sprint workers are cheap to re-run but expensive to let spin. Three
//! detectors run each turn: identical action lists, identical response text,
//! and degenerate token repetition inside one response.

use std::collections::HashMap;

/// Consecutive identical turns tolerated before a trip
const REPEAT_LIMIT: u32 = 3;

/// Occurrences of one token within a single response that trip immediately
const RUNAWAY_OCCURRENCES: usize = 20;

/// Tokens longer than this are not considered "short"
const SHORT_TOKEN_MAX_LEN: usize = 20;

/// Which detector fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorTrip {
    /// Same ordered action list three turns in a row
    RepeatedActions,
    /// Same full response text three turns in a row
    RepeatedText,
    /// One short token appeared at least twenty times in one response
    RunawayOutput(String),
}

impl std::fmt::Display for DetectorTrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RepeatedActions => write!(f, "identical actions repeated"),
            Self::RepeatedText => write!(f, "identical response repeated"),
            Self::RunawayOutput(token) => write!(f, "runaway output ('{}')", token),
        }
    }
}

/// Per-worker detector state
#[derive(Debug, Default)]
pub struct LoopDetectors {
    prev_actions: Option<Vec<String>>,
    prev_text: Option<String>,
    action_repeats: u32,
    text_repeats: u32,
}

impl LoopDetectors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one turn's observations; a trip fails the task.
    pub fn observe(&mut self, actions: &[String], text: &str) -> Option<DetectorTrip> {
        if let Some(token) = runaway_token(text) {
            return Some(DetectorTrip::RunawayOutput(token));
        }

        if self.prev_actions.as_deref() == Some(actions) {
            self.action_repeats += 1;
        } else {
            self.action_repeats = 0;
            self.prev_actions = Some(actions.to_vec());
        }
        if self.action_repeats >= REPEAT_LIMIT {
            return Some(DetectorTrip::RepeatedActions);
        }

        if self.prev_text.as_deref() == Some(text) {
            self.text_repeats += 1;
        } else {
            self.text_repeats = 0;
            self.prev_text = Some(text.to_string());
        }
        if self.text_repeats >= REPEAT_LIMIT {
            return Some(DetectorTrip::RepeatedText);
        }

        None
    }
}

fn runaway_token(text: &str) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in text.split_whitespace() {
        if token.len() > SHORT_TOKEN_MAX_LEN {
            continue;
        }
        let count = counts.entry(token).or_insert(0);
        *count += 1;
        if *count >= RUNAWAY_OCCURRENCES {
            return Some(token.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identical_actions_trip_on_fourth_turn() {
        let mut detectors = LoopDetectors::new();
        let same = actions(&["Ran Bash: cargo test"]);

        assert!(detectors.observe(&same, "turn one").is_none());
        assert!(detectors.observe(&same, "turn two").is_none());
        assert!(detectors.observe(&same, "turn three").is_none());
        assert_eq!(
            detectors.observe(&same, "turn four"),
            Some(DetectorTrip::RepeatedActions)
        );
    }

    #[test]
    fn test_varied_actions_reset_counter() {
        let mut detectors = LoopDetectors::new();
        let a = actions(&["Ran Bash: ls"]);
        let b = actions(&["Wrote File: x"]);

        assert!(detectors.observe(&a, "1").is_none());
        assert!(detectors.observe(&a, "2").is_none());
        assert!(detectors.observe(&b, "3").is_none());
        assert!(detectors.observe(&a, "4").is_none());
        assert!(detectors.observe(&a, "5").is_none());
        assert!(detectors.observe(&a, "6").is_none());
        assert_eq!(detectors.observe(&a, "7"), Some(DetectorTrip::RepeatedActions));
    }

    #[test]
    fn test_identical_text_trips() {
        let mut detectors = LoopDetectors::new();

        // Different actions each turn so only the text detector can fire
        assert!(detectors.observe(&actions(&["a"]), "same reply").is_none());
        assert!(detectors.observe(&actions(&["b"]), "same reply").is_none());
        assert!(detectors.observe(&actions(&["c"]), "same reply").is_none());
        assert_eq!(
            detectors.observe(&actions(&["d"]), "same reply"),
            Some(DetectorTrip::RepeatedText)
        );
    }

    #[test]
    fn test_runaway_output_immediate() {
        let mut detectors = LoopDetectors::new();
        let degenerate = "loop ".repeat(25);

        match detectors.observe(&[], &degenerate) {
            Some(DetectorTrip::RunawayOutput(token)) => assert_eq!(token, "loop"),
            other => panic!("expected runaway trip, got {:?}", other),
        }
    }

    #[test]
    fn test_long_tokens_not_runaway() {
        let mut detectors = LoopDetectors::new();
        let long_token = "a-token-well-beyond-twenty-characters ".repeat(25);
        assert!(detectors.observe(&[], &long_token).is_none());
    }

    #[test]
    fn test_normal_turns_pass() {
        let mut detectors = LoopDetectors::new();
        assert!(
            detectors
                .observe(&actions(&["Ran Bash: cargo build"]), "Building the index module now.")
                .is_none()
        );
        assert!(
            detectors
                .observe(&actions(&["Wrote File: src/index.rs"]), "Index written, adding tests.")
                .is_none()
        );
    }
}
