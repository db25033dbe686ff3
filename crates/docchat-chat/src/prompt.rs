//! Prompt assembly and chain templates.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::types::{ChatMessage, ROLE_USER};
use docchat_core::config::DEFAULT_SYSTEM_PROMPT;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").unwrap());

/// Inputs for one turn: system instructions, prior history, new message.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub system: String,
    pub history: &'a [ChatMessage],
    pub query: &'a str,
}

impl<'a> PromptInput<'a> {
    pub fn new(system_prompt: &str, history: &'a [ChatMessage], query: &'a str) -> Self {
        Self {
            system: system_instructions(system_prompt, &current_time()),
            history,
            query,
        }
    }

    /// True when the history contains an earlier user turn.
    pub fn has_prior_turns(&self) -> bool {
        self.history.iter().any(|m| m.role == ROLE_USER)
    }
}

pub fn current_time() -> String {
    chrono::Local::now().to_string()
}

/// Custom (or default) instructions followed by the current time.
pub fn system_instructions(system_prompt: &str, now: &str) -> String {
    let base = match system_prompt.trim() {
        "" => DEFAULT_SYSTEM_PROMPT,
        trimmed => trimmed,
    };
    format!("{}\nIt's currently {}.", base, now)
}

/// System message, full history, then the new user message.
pub fn build_messages(system: &str, history: &[ChatMessage], query: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(query));
    messages
}

/// Number retrieved chunks for inclusion in a prompt.
pub fn context_block(docs: &[String]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, d)| format!("[{}] {}", i + 1, d))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn transcript(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub const CONDENSE_TEMPLATE: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language.\n\n\
Chat History:\n{history}\nFollow Up Input: {question}\nStandalone question:";

pub const STUFF_TEMPLATE: &str = "Use the following pieces of context to answer the user's question. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
----------------\n{context}";

pub const REFINE_INITIAL_TEMPLATE: &str = "Context information is below.\n\
---------------------\n{context}\n---------------------\n\
Given the context information and not prior knowledge, answer the question: {question}";

pub const REFINE_TEMPLATE: &str = "The original question is as follows: {question}\n\
We have provided an existing answer: {existing_answer}\n\
We have the opportunity to refine the existing answer (only if needed) with some more context below.\n\
------------\n{context}\n------------\n\
Given the new context, refine the original answer to better answer the question. \
If the context isn't useful, return the original answer.";

pub const MAP_TEMPLATE: &str = "Use the following portion of a long document to see if any of the text \
is relevant to answer the question. Return any relevant text verbatim.\n{context}\n\
Question: {question}\nRelevant text, if any:";

pub const RERANK_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
In addition to giving an answer, also return a score of how fully it answered the user's question. \
This should be in the following format:\n\n\
Question: [question here]\nHelpful Answer: [answer here]\nScore: [score between 0 and 100]\n\n\
Begin!\n\nContext:\n---------\n{context}\n---------\nQuestion: {question}\nHelpful Answer:";

pub const SUMMARY_MAP_TEMPLATE: &str = "Write a concise summary of the following:\n\n\"{context}\"\n\nCONCISE SUMMARY:";

pub const SUMMARY_COMBINE_TEMPLATE: &str = "Combine the following partial summaries of one document into \
a single concise summary. Follow these instructions from the user: {question}\n\n{context}\n\nSUMMARY:";

pub const QA_GENERATION_TEMPLATE: &str = "You are a smart assistant designed to help high school teachers \
come up with reading comprehension questions. Given a piece of text, you must come up with a question and \
answer pair that can be used to test a student's reading comprehension abilities. \
The user is interested in: {question}\n\
When coming up with this question/answer pair, you must respond in the following format:\n\
{\"question\": \"$YOUR_QUESTION_HERE\", \"answer\": \"$THE_ANSWER_HERE\"}\n\n\
Everything between the ``` must be valid json.\n\n\
Please come up with a question/answer pair, in the specified JSON format, for the following text:\n\
----------------\n{context}";

/// Fill `{name}` placeholders in one pass over the template. Unknown
/// placeholders are left as-is, and substituted text is never rescanned.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_instructions_default_and_time() {
        let s = system_instructions("  ", "2024-01-01 10:00");
        assert_eq!(s, format!("{}\nIt's currently 2024-01-01 10:00.", DEFAULT_SYSTEM_PROMPT));
        let s = system_instructions("Talk like a pirate.", "now");
        assert!(s.starts_with("Talk like a pirate.\n"));
    }

    #[test]
    fn test_build_messages_order() {
        let history = vec![ChatMessage::assistant("Hello!"), ChatMessage::user("Hi")];
        let messages = build_messages("sys", &history, "What now?");
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "assistant", "user", "user"]);
        assert_eq!(messages[3].content, "What now?");
    }

    #[test]
    fn test_render_leaves_json_braces() {
        let out = render(QA_GENERATION_TEMPLATE, &[("question", "ownership"), ("context", "Rust text")]);
        assert!(out.contains("{\"question\": \"$YOUR_QUESTION_HERE\""));
        assert!(out.contains("The user is interested in: ownership"));
        assert!(out.ends_with("Rust text"));
    }

    #[test]
    fn test_render_does_not_rescan_substituted_text() {
        let out = render(
            MAP_TEMPLATE,
            &[
                ("context", "Use the {question} placeholder in templates."),
                ("question", "What is Rust?"),
            ],
        );
        assert!(out.contains("Use the {question} placeholder in templates."));
        assert!(out.contains("What is Rust?"));

        let out = render("{a} then {b} and {missing}", &[("a", "{b}"), ("b", "{a}")]);
        assert_eq!(out, "{b} then {a} and {missing}");
    }

    #[test]
    fn test_has_prior_turns() {
        let greeting = vec![ChatMessage::assistant("Hello!")];
        assert!(!PromptInput::new("", &greeting, "q").has_prior_turns());
        let more = vec![ChatMessage::assistant("Hello!"), ChatMessage::user("hi")];
        assert!(PromptInput::new("", &more, "q").has_prior_turns());
    }
}
