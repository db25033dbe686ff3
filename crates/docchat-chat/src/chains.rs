//! Document chains: how retrieved chunks are combined with the question.
//!
//! Multi-call strategies run their intermediate calls silently; only the
//! final call (or the final selected answer) reaches the caller's sink.

use std::sync::Arc;

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::{complete, ChatModel, SharedModel};
use crate::prompt::{self, PromptInput};
use crate::sink::{NullSink, TokenSink};
use crate::types::{ChainType, ChatMessage};
use docchat_core::Result;
use docchat_ingest::DocumentContext;

static SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(.*?)\s*score:\s*(\d+)").unwrap());

/// A chain strategy bound to a model and an uploaded document.
pub struct DocumentChain {
    chain_type: ChainType,
    llm: SharedModel,
    context: Arc<DocumentContext>,
}

impl DocumentChain {
    pub fn new(chain_type: ChainType, llm: SharedModel, context: Arc<DocumentContext>) -> Self {
        Self {
            chain_type,
            llm,
            context,
        }
    }

    pub fn chain_type(&self) -> ChainType {
        self.chain_type
    }

    pub async fn run(&self, input: &PromptInput<'_>, sink: &mut dyn TokenSink) -> Result<String> {
        let llm = self.llm.as_ref();

        if self.chain_type == ChainType::Summarization {
            let texts: Vec<String> = self.context.texts().into_iter().map(String::from).collect();
            return summarize(llm, input, &texts, sink).await;
        }

        let question = self.standalone_question(input).await?;
        let docs: Vec<String> = self
            .context
            .retriever
            .retrieve(&question)
            .await?
            .into_iter()
            .map(|hit| hit.text)
            .collect();

        debug!(
            "Running {} chain over {} retrieved chunks",
            self.chain_type,
            docs.len()
        );

        match self.chain_type {
            ChainType::Stuff => stuff(llm, input, &question, &docs, sink).await,
            ChainType::Refine => refine(llm, input, &question, &docs, sink).await,
            ChainType::MapReduce => map_reduce(llm, input, &question, &docs, sink).await,
            ChainType::MapRerank => map_rerank(llm, &question, &docs, sink).await,
            ChainType::QaGeneration => qa_generation(llm, &question, &docs, sink).await,
            ChainType::Summarization => summarize(llm, input, &docs, sink).await,
        }
    }

    /// Rephrase a follow-up into a standalone question when there is history.
    async fn standalone_question(&self, input: &PromptInput<'_>) -> Result<String> {
        if !input.has_prior_turns() {
            return Ok(input.query.to_string());
        }
        let content = prompt::render(
            prompt::CONDENSE_TEMPLATE,
            &[
                ("history", &prompt::transcript(input.history)),
                ("question", input.query),
            ],
        );
        let condensed = complete(self.llm.as_ref(), vec![ChatMessage::user(content)], &mut NullSink).await?;
        let condensed = condensed.trim();
        Ok(if condensed.is_empty() {
            input.query.to_string()
        } else {
            condensed.to_string()
        })
    }
}

/// Run one silent call per input, at most `max_concurrency` at a time.
async fn map_calls(llm: &dyn ChatModel, prompts: Vec<String>) -> Result<Vec<String>> {
    futures::stream::iter(prompts.into_iter().map(|content| async move {
        complete(llm, vec![ChatMessage::user(content)], &mut NullSink).await
    }))
    .buffered(llm.max_concurrency().max(1))
    .collect::<Vec<_>>()
    .await
    .into_iter()
    .collect()
}

async fn stuff(
    llm: &dyn ChatModel,
    input: &PromptInput<'_>,
    question: &str,
    docs: &[String],
    sink: &mut dyn TokenSink,
) -> Result<String> {
    let context = prompt::render(prompt::STUFF_TEMPLATE, &[("context", &prompt::context_block(docs))]);
    let messages = vec![
        ChatMessage::system(format!("{}\n\n{}", input.system, context)),
        ChatMessage::user(question),
    ];
    complete(llm, messages, sink).await
}

async fn refine(
    llm: &dyn ChatModel,
    input: &PromptInput<'_>,
    question: &str,
    docs: &[String],
    sink: &mut dyn TokenSink,
) -> Result<String> {
    let Some((first, rest)) = docs.split_first() else {
        return stuff(llm, input, question, docs, sink).await;
    };

    let initial = prompt::render(
        prompt::REFINE_INITIAL_TEMPLATE,
        &[("context", first), ("question", question)],
    );
    let system = ChatMessage::system(input.system.clone());

    if rest.is_empty() {
        return complete(llm, vec![system, ChatMessage::user(initial)], sink).await;
    }

    let mut answer = complete(llm, vec![system.clone(), ChatMessage::user(initial)], &mut NullSink).await?;

    for (i, doc) in rest.iter().enumerate() {
        let content = prompt::render(
            prompt::REFINE_TEMPLATE,
            &[("question", question), ("existing_answer", &answer), ("context", doc)],
        );
        let messages = vec![system.clone(), ChatMessage::user(content)];
        answer = if i + 1 == rest.len() {
            complete(llm, messages, sink).await?
        } else {
            complete(llm, messages, &mut NullSink).await?
        };
    }
    Ok(answer)
}

async fn map_reduce(
    llm: &dyn ChatModel,
    input: &PromptInput<'_>,
    question: &str,
    docs: &[String],
    sink: &mut dyn TokenSink,
) -> Result<String> {
    let prompts = docs
        .iter()
        .map(|doc| prompt::render(prompt::MAP_TEMPLATE, &[("context", doc), ("question", question)]))
        .collect();
    let extracts: Vec<String> = map_calls(llm, prompts)
        .await?
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    stuff(llm, input, question, &extracts, sink).await
}

async fn map_rerank(
    llm: &dyn ChatModel,
    question: &str,
    docs: &[String],
    sink: &mut dyn TokenSink,
) -> Result<String> {
    let prompts = docs
        .iter()
        .map(|doc| prompt::render(prompt::RERANK_TEMPLATE, &[("context", doc), ("question", question)]))
        .collect();
    let replies = map_calls(llm, prompts).await?;

    let mut best: Option<(String, u32)> = None;
    for reply in &replies {
        let (answer, score) = parse_scored_answer(reply);
        if best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((answer, score));
        }
    }

    let answer = best.map(|(a, _)| a).unwrap_or_default();
    sink.on_token(&answer);
    sink.on_done();
    Ok(answer)
}

/// Split `"<answer> Score: <n>"`. A missing score counts as 0.
pub fn parse_scored_answer(reply: &str) -> (String, u32) {
    let (answer, score) = match SCORE_RE.captures(reply) {
        Some(caps) => (
            caps.get(1).map_or("", |m| m.as_str()),
            caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
        ),
        None => (reply, 0),
    };
    let answer = answer.trim();
    let answer = answer
        .strip_prefix("Helpful Answer:")
        .map(str::trim)
        .unwrap_or(answer);
    (answer.to_string(), score.min(100))
}

async fn summarize(
    llm: &dyn ChatModel,
    input: &PromptInput<'_>,
    texts: &[String],
    sink: &mut dyn TokenSink,
) -> Result<String> {
    let prompts = texts
        .iter()
        .map(|t| prompt::render(prompt::SUMMARY_MAP_TEMPLATE, &[("context", t)]))
        .collect();
    let summaries = map_calls(llm, prompts).await?;

    let combine = prompt::render(
        prompt::SUMMARY_COMBINE_TEMPLATE,
        &[("question", input.query), ("context", &summaries.join("\n\n"))],
    );
    let messages = vec![
        ChatMessage::system(input.system.clone()),
        ChatMessage::user(combine),
    ];
    complete(llm, messages, sink).await
}

#[derive(Debug, Deserialize)]
struct QaPair {
    question: String,
    answer: String,
}

async fn qa_generation(
    llm: &dyn ChatModel,
    question: &str,
    docs: &[String],
    sink: &mut dyn TokenSink,
) -> Result<String> {
    let prompts = docs
        .iter()
        .map(|doc| prompt::render(prompt::QA_GENERATION_TEMPLATE, &[("question", question), ("context", doc)]))
        .collect();
    let replies = map_calls(llm, prompts).await?;

    let mut output = String::new();
    for (i, reply) in replies.iter().enumerate() {
        let section = match parse_qa_pair(reply) {
            Some(pair) => format!(
                "### Q&A {}\n**Question:** {}\n\n**Answer:** {}\n\n",
                i + 1,
                pair.question,
                pair.answer
            ),
            None => {
                warn!("Q&A reply {} was not valid JSON", i + 1);
                format!("### Q&A {}\n{}\n\n", i + 1, reply.trim())
            }
        };
        sink.on_token(&section);
        output.push_str(&section);
    }
    sink.on_done();
    Ok(output.trim_end().to_string())
}

/// Pull the first `{...}` object out of a reply, tolerating code fences.
fn parse_qa_pair(reply: &str) -> Option<QaPair> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}
