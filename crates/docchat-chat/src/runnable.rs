//! The per-turn callable: plain chat or a document chain.

use std::sync::Arc;

use crate::chains::DocumentChain;
use crate::model::{complete, SharedModel};
use crate::prompt::{build_messages, PromptInput};
use crate::sink::TokenSink;
use crate::types::ChainType;
use docchat_core::Result;
use docchat_ingest::DocumentContext;

pub enum Runnable {
    Chat(SharedModel),
    Document(DocumentChain),
}

/// Pick plain chat or a document chain for this turn.
///
/// Document chat applies only when it is enabled and a document is loaded.
pub fn get_runnable(
    use_document_chat: bool,
    chain_type: ChainType,
    llm: SharedModel,
    document: Option<Arc<DocumentContext>>,
) -> Runnable {
    match document {
        Some(context) if use_document_chat => {
            Runnable::Document(DocumentChain::new(chain_type, llm, context))
        }
        _ => Runnable::Chat(llm),
    }
}

impl Runnable {
    /// Produce the assistant reply, streaming it into `sink`.
    pub async fn invoke(&self, input: &PromptInput<'_>, sink: &mut dyn TokenSink) -> Result<String> {
        match self {
            Runnable::Chat(llm) => {
                let messages = build_messages(&input.system, input.history, input.query);
                complete(llm.as_ref(), messages, sink).await
            }
            Runnable::Document(chain) => chain.run(input, sink).await,
        }
    }

    /// Short name recorded on traced runs.
    pub fn name(&self) -> String {
        match self {
            Runnable::Chat(_) => "chat".into(),
            Runnable::Document(chain) => format!("document_chat:{}", chain.chain_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::ScriptedModel;
    use crate::sink::NullSink;
    use crate::types::ChatMessage;
    use docchat_core::ChunkParams;
    use docchat_ingest::{get_texts_and_retriever, NoopEmbedder};

    #[tokio::test]
    async fn test_plain_chat_without_document() {
        let model = Arc::new(ScriptedModel::replying("Hi there"));
        let runnable = get_runnable(true, ChainType::Stuff, model.clone(), None);
        assert_eq!(runnable.name(), "chat");

        let history = vec![ChatMessage::assistant("Hello!")];
        let input = PromptInput::new("Be kind.", &history, "Hi");
        let reply = runnable.invoke(&input, &mut NullSink).await.unwrap();
        assert_eq!(reply, "Hi there");

        let calls = model.calls.lock();
        assert_eq!(calls[0].len(), 3);
        assert!(calls[0][0].content.starts_with("Be kind.\nIt's currently "));
    }

    #[tokio::test]
    async fn test_document_chat_toggle() {
        let context = Arc::new(
            get_texts_and_retriever(b"Some text.", Some("a.txt"), ChunkParams::default(), Arc::new(NoopEmbedder))
                .await
                .unwrap(),
        );
        let model: SharedModel = Arc::new(ScriptedModel::replying("ok"));

        let on = get_runnable(true, ChainType::MapRerank, model.clone(), Some(context.clone()));
        assert_eq!(on.name(), "document_chat:map_rerank");

        let off = get_runnable(false, ChainType::MapRerank, model, Some(context));
        assert_eq!(off.name(), "chat");
    }
}
