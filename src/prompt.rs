//! Prompt composition for the restaurant assistant.
//!
//! The prompt is assembled from fixed sections in a fixed order: preamble,
//! language directive, knowledge context, conversation history, the current
//! question, then the instruction list. Nothing is truncated here; the
//! number of context strings and history turns is bounded upstream.

use crate::models::ChatTurn;

/// Reply used when retrieval produced no context at all.
pub const NO_INFORMATION_RESPONSE: &str =
    "I couldn't find any relevant information to answer your question.";

/// Rendered in place of history for a fresh session.
pub const NEW_CONVERSATION_MARKER: &str = "This is the start of a new conversation.";

/// Turns rendered into the history section, newest last.
pub const DEFAULT_HISTORY_TURNS: usize = 5;

const PREAMBLE: &str = "You are a helpful assistant for a restaurant. You specialize in providing information about the restaurant's menu, services, hours, and general dining experience.";

const INSTRUCTIONS: &[&str] = &[
    "Be friendly, helpful, and professional",
    "Focus on restaurant-related topics",
    "ALWAYS use the Restaurant Knowledge provided above to answer questions",
    "If the Restaurant Knowledge contains relevant information, use it directly in your response",
    "Only suggest contacting the restaurant if the specific information is not in the Restaurant Knowledge",
    "Keep responses concise but informative",
    "STRICTLY follow the language instructions provided",
    "Maintain the conversational context from previous messages",
];

/// Directive for a language code. Unknown or absent codes get English.
pub fn language_instruction(language: Option<&str>) -> &'static str {
    match language.map(str::trim) {
        Some("zh") => "请用中文回答",
        Some("ja") => "日本語で回答してください",
        Some("ko") => "한국어로 답변해주세요",
        _ => "Respond in English",
    }
}

/// Render the last `limit` turns (chronological input) as
/// `User:`/`Assistant:` lines. `limit` is capped at
/// [`DEFAULT_HISTORY_TURNS`].
pub fn render_history(history: &[ChatTurn], limit: usize) -> String {
    let limit = limit.min(DEFAULT_HISTORY_TURNS);
    if history.is_empty() || limit == 0 {
        return NEW_CONVERSATION_MARKER.to_string();
    }

    let start = history.len().saturating_sub(limit);
    history[start..]
        .iter()
        .flat_map(|turn| {
            [
                format!("User: {}", turn.query),
                format!("Assistant: {}", turn.response),
            ]
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the full generation prompt.
pub fn compose_prompt(
    question: &str,
    context: &[String],
    history: &[ChatTurn],
    language: Option<&str>,
    history_limit: usize,
) -> String {
    let instructions: String = INSTRUCTIONS
        .iter()
        .map(|line| format!("- {}\n", line))
        .collect();

    format!(
        "{preamble}\n\n\
         {language}.\n\n\
         Restaurant Knowledge (USE THIS INFORMATION TO ANSWER):\n{context}\n\n\
         Conversation History:\n{history}\n\n\
         Current User Question: {question}\n\n\
         Instructions:\n{instructions}\n\
         Response:",
        preamble = PREAMBLE,
        language = language_instruction(language),
        context = context.join("\n"),
        history = render_history(history, history_limit),
        question = question,
        instructions = instructions,
    )
}

/// Degraded reply built from the raw context when generation fails.
pub fn fallback_response(context: &[String]) -> String {
    format!(
        "I found some information but couldn't generate a proper response. Here's what I found: {}",
        context.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(n: usize) -> ChatTurn {
        ChatTurn {
            id: format!("t{}", n),
            session_id: "s".to_string(),
            query: format!("q{}", n),
            response: format!("r{}", n),
            language: "en".to_string(),
            timestamp: String::new(),
        }
    }

    #[test]
    fn test_history_bounded_to_last_turns() {
        let history: Vec<ChatTurn> = (1..=7).map(turn).collect();
        let rendered = render_history(&history, DEFAULT_HISTORY_TURNS);
        assert!(!rendered.contains("User: q1\n"));
        assert!(!rendered.contains("User: q2\n"));
        assert!(rendered.starts_with("User: q3\nAssistant: r3"));
        assert!(rendered.ends_with("User: q7\nAssistant: r7"));
        assert_eq!(rendered.lines().count(), 10);
    }

    #[test]
    fn test_history_limit_never_exceeds_cap() {
        let history: Vec<ChatTurn> = (1..=12).map(turn).collect();
        let rendered = render_history(&history, 10);
        assert_eq!(rendered.lines().count(), 2 * DEFAULT_HISTORY_TURNS);
        assert!(rendered.starts_with("User: q8\n"));
    }

    #[test]
    fn test_empty_history_marker() {
        assert_eq!(render_history(&[], 5), NEW_CONVERSATION_MARKER);
    }

    #[test]
    fn test_language_fallback() {
        assert_eq!(language_instruction(Some("ja")), "日本語で回答してください");
        assert_eq!(language_instruction(Some("fr")), "Respond in English");
        assert_eq!(language_instruction(None), "Respond in English");
    }

    #[test]
    fn test_prompt_section_order() {
        let prompt = compose_prompt(
            "When do you open?",
            &["hours: 9am-5pm".to_string(), "menu item 0: \"Soup\"".to_string()],
            &[turn(1)],
            Some("zh"),
            5,
        );

        let order = [
            "You are a helpful assistant",
            "请用中文回答.",
            "Restaurant Knowledge (USE THIS INFORMATION TO ANSWER):\nhours: 9am-5pm\nmenu item 0: \"Soup\"",
            "Conversation History:\nUser: q1\nAssistant: r1",
            "Current User Question: When do you open?",
            "Instructions:\n- Be friendly",
            "- Maintain the conversational context from previous messages\n\nResponse:",
        ];
        let mut last = 0;
        for section in order {
            let pos = prompt[last..]
                .find(section)
                .unwrap_or_else(|| panic!("missing or out of order: {}", section));
            last += pos;
        }
        assert!(prompt.ends_with("Response:"));
    }

    #[test]
    fn test_fallback_joins_context() {
        let context = vec!["hours: 9am-5pm".to_string(), "menu - special: \"Fish\"".to_string()];
        assert_eq!(
            fallback_response(&context),
            "I found some information but couldn't generate a proper response. Here's what I found: hours: 9am-5pm; menu - special: \"Fish\""
        );
    }
}
