use serde_json::Value;

use crate::{AgentMessage, ConversationTurn, ModelHook, ModelRequest, RoutePath};

/// Verbs that imply a state change. Any hit forces the agent path; the
/// fast path must never mutate.
const MUTATING_HINTS: &[&str] = &[
    "create",
    "add",
    "new task",
    "update",
    "mark",
    "finish",
    "complete",
    "delete",
    "remove",
    "rename",
    "reschedule",
    "change",
    "cancel",
    "move",
    "push back",
    "set",
];

/// Read-shaped openings and keywords the deterministic path can answer.
const READ_HINTS: &[&str] = &[
    "how many",
    "what",
    "which",
    "when",
    "do i have",
    "list",
    "show",
    "due",
    "overdue",
    "anything due",
    "my tasks",
    "open tasks",
    "in progress",
];

/// How many trailing history turns the model classifier gets to see.
const CLASSIFIER_TURNS: usize = 4;

#[derive(Debug, Clone)]
pub(crate) struct RouteDecision {
    pub(crate) path: RoutePath,
    /// "model" or "heuristic"; kept for logs and the route subcommand.
    pub(crate) source: &'static str,
    pub(crate) confidence: f64,
}

/// Route a message. The model classifier runs first when one is
/// configured and sees the tail of the conversation, so a terse
/// follow-up ("and the second one?") routes on the intent of the prior
/// turns; a low-confidence or malformed answer falls back to the
/// keyword heuristic, so routing always succeeds.
pub(crate) fn classify(
    model: Option<&dyn ModelHook>,
    confidence_floor: f64,
    message: &str,
    recent_turns: &[ConversationTurn],
) -> RouteDecision {
    if let Some(model) = model {
        if let Some(decision) = classify_with_model(model, confidence_floor, message, recent_turns)
        {
            return decision;
        }
    }
    classify_heuristic(message)
}

fn classify_with_model(
    model: &dyn ModelHook,
    confidence_floor: f64,
    message: &str,
    recent_turns: &[ConversationTurn],
) -> Option<RouteDecision> {
    let mut prompt = String::from(
        "Classify this task-assistant message. Answer with only JSON: \
         {\"path\": \"fast\" or \"agent\", \"confidence\": 0.0-1.0}. \
         \"fast\" is for simple read-only questions about existing tasks \
         (counts, lists, due dates, statuses); \"agent\" is for anything \
         that creates or changes tasks, or needs reasoning.",
    );
    if !recent_turns.is_empty() {
        // recent_turns arrives oldest to newest; keep only the tail
        let tail = &recent_turns[recent_turns.len().saturating_sub(CLASSIFIER_TURNS)..];
        prompt.push_str("\n\nRecent conversation:");
        for turn in tail {
            prompt.push_str(&format!("\n{}: {}", turn.role, turn.content));
        }
    }
    prompt.push_str(&format!("\n\nMessage: {message}"));
    let request = ModelRequest {
        messages: vec![AgentMessage::text("user", prompt)],
        tools: Vec::new(),
    };
    let reply = match model.complete(&request) {
        Ok(reply) => reply,
        Err(e) => {
            eprintln!("[router] classifier unavailable, using heuristic: {e}");
            return None;
        }
    };
    let text = reply.content?;
    let parsed = parse_classification(&text)?;
    let (path, confidence) = parsed;
    if confidence < confidence_floor {
        return None;
    }
    Some(RouteDecision {
        path,
        source: "model",
        confidence,
    })
}

/// Pull the JSON object out of the reply, tolerating surrounding prose.
fn parse_classification(text: &str) -> Option<(RoutePath, f64)> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let path = match value.get("path")?.as_str()? {
        "fast" => RoutePath::FastPath,
        "agent" => RoutePath::AgentPath,
        _ => return None,
    };
    let confidence = value.get("confidence")?.as_f64()?;
    if !(0.0..=1.0).contains(&confidence) {
        return None;
    }
    Some((path, confidence))
}

fn tokenize(message: &str) -> Vec<String> {
    message
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-word phrase match so "set" doesn't fire on "sunset".
fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    words
        .windows(needle.len())
        .any(|win| win.iter().map(String::as_str).eq(needle.iter().copied()))
}

pub(crate) fn classify_heuristic(message: &str) -> RouteDecision {
    let words = tokenize(message);
    if MUTATING_HINTS.iter().any(|h| contains_phrase(&words, h)) {
        return RouteDecision {
            path: RoutePath::AgentPath,
            source: "heuristic",
            confidence: 1.0,
        };
    }
    let reads_like_question = READ_HINTS.iter().any(|h| contains_phrase(&words, h))
        || message.trim_end().ends_with('?');
    if reads_like_question {
        return RouteDecision {
            path: RoutePath::FastPath,
            source: "heuristic",
            confidence: 1.0,
        };
    }
    // Ambiguity goes to the path that can always cope
    RouteDecision {
        path: RoutePath::AgentPath,
        source: "heuristic",
        confidence: 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Result<String, String>,
    }

    impl ModelHook for ScriptedModel {
        fn complete(&self, _: &ModelRequest) -> Result<AgentMessage, String> {
            self.reply
                .clone()
                .map(|text| AgentMessage::text("assistant", text))
        }
    }

    /// Records the prompt it was asked to classify.
    struct CapturingModel {
        seen: Mutex<Vec<ModelRequest>>,
        reply: String,
    }

    impl ModelHook for CapturingModel {
        fn complete(&self, request: &ModelRequest) -> Result<AgentMessage, String> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(AgentMessage::text("assistant", self.reply.clone()))
        }
    }

    fn turn(role: &str, content: &str) -> ConversationTurn {
        ConversationTurn {
            user_id: "u1".to_string(),
            session_id: "s1".to_string(),
            seq: 1,
            role: role.to_string(),
            content: content.to_string(),
            ts_utc: 0,
        }
    }

    #[test]
    fn test_heuristic_mutations_go_to_agent() {
        for msg in [
            "create a task to buy milk",
            "mark the report as done",
            "delete task t3",
            "reschedule my dentist appointment to friday",
            "push back the review",
        ] {
            assert_eq!(classify_heuristic(msg).path, RoutePath::AgentPath, "{msg}");
        }
    }

    #[test]
    fn test_heuristic_reads_go_to_fast_path() {
        for msg in [
            "how many tasks do I have?",
            "what's due this week",
            "list my open tasks",
            "anything overdue?",
        ] {
            assert_eq!(classify_heuristic(msg).path, RoutePath::FastPath, "{msg}");
        }
    }

    #[test]
    fn test_hint_must_match_a_whole_word() {
        // "sunset" must not trip "set", "ladder" must not trip "add"
        for msg in [
            "when is the sunset over the lake?",
            "which ladder tasks are overdue?",
            "is the marketing task still open?",
        ] {
            assert_eq!(classify_heuristic(msg).path, RoutePath::FastPath, "{msg}");
        }
    }

    #[test]
    fn test_heuristic_ambiguous_goes_to_agent() {
        let decision = classify_heuristic("the thing with the garage");
        assert_eq!(decision.path, RoutePath::AgentPath);
        assert!(decision.confidence < 1.0);
    }

    #[test]
    fn test_mutation_wins_even_when_phrased_as_question() {
        let decision = classify_heuristic("can you mark the report done?");
        assert_eq!(decision.path, RoutePath::AgentPath);
    }

    #[test]
    fn test_confident_model_answer_is_used() {
        let model = ScriptedModel {
            reply: Ok(r#"{"path": "fast", "confidence": 0.9}"#.to_string()),
        };
        let decision = classify(Some(&model), 0.6, "delete everything", &[]);
        assert_eq!(decision.path, RoutePath::FastPath);
        assert_eq!(decision.source, "model");
    }

    #[test]
    fn test_low_confidence_falls_back_to_heuristic() {
        let model = ScriptedModel {
            reply: Ok(r#"{"path": "fast", "confidence": 0.3}"#.to_string()),
        };
        let decision = classify(Some(&model), 0.6, "delete task t1", &[]);
        assert_eq!(decision.path, RoutePath::AgentPath);
        assert_eq!(decision.source, "heuristic");
    }

    #[test]
    fn test_malformed_model_answer_falls_back() {
        let model = ScriptedModel {
            reply: Ok("definitely the fast one".to_string()),
        };
        let decision = classify(Some(&model), 0.6, "how many tasks do I have?", &[]);
        assert_eq!(decision.path, RoutePath::FastPath);
        assert_eq!(decision.source, "heuristic");
    }

    #[test]
    fn test_model_error_falls_back() {
        let model = ScriptedModel {
            reply: Err("connection refused".to_string()),
        };
        let decision = classify(Some(&model), 0.6, "list my tasks", &[]);
        assert_eq!(decision.source, "heuristic");
    }

    #[test]
    fn test_recent_turns_reach_the_classifier_prompt() {
        let model = CapturingModel {
            seen: Mutex::new(Vec::new()),
            reply: r#"{"path": "agent", "confidence": 0.9}"#.to_string(),
        };
        let history = vec![
            turn("user", "add a task to renew my passport"),
            turn("assistant", "Added. Anything else?"),
        ];
        let decision = classify(Some(&model), 0.6, "and one for the visa too", &history);
        assert_eq!(decision.path, RoutePath::AgentPath);
        assert_eq!(decision.source, "model");

        let seen = model.seen.lock().unwrap();
        let prompt = seen[0].messages[0].content.as_deref().unwrap();
        assert!(prompt.contains("renew my passport"));
        assert!(prompt.contains("and one for the visa too"));
    }

    #[test]
    fn test_classifier_prompt_keeps_only_the_tail_of_history() {
        let model = CapturingModel {
            seen: Mutex::new(Vec::new()),
            reply: r#"{"path": "fast", "confidence": 0.9}"#.to_string(),
        };
        let history: Vec<ConversationTurn> = (0..10)
            .map(|i| turn("user", &format!("turn number {i}")))
            .collect();
        classify(Some(&model), 0.6, "how many left?", &history);

        let seen = model.seen.lock().unwrap();
        let prompt = seen[0].messages[0].content.as_deref().unwrap();
        assert!(!prompt.contains("turn number 0"));
        assert!(prompt.contains("turn number 9"));
    }

    #[test]
    fn test_classification_json_embedded_in_prose() {
        let parsed =
            parse_classification("Sure! {\"path\": \"agent\", \"confidence\": 0.8} there you go");
        assert_eq!(parsed, Some((RoutePath::AgentPath, 0.8)));
        assert!(parse_classification("no json here").is_none());
        assert!(parse_classification(r#"{"path": "agent", "confidence": 1.5}"#).is_none());
    }
}
