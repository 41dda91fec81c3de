//! Chat orchestration on top of the query cache.
//!
//! Each incoming message is answered from the tenant's query cache when
//! possible. On a miss the orchestrator retrieves grounding documents, asks
//! the LLM for an answer, parses it and caches the result for the next caller.
//!
//! Retrieval and generation are external concerns, modelled as the
//! [`DocumentRetriever`] and [`ReplyGenerator`] traits.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::QueryCache;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by the orchestrator. Cache failures never surface here.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Conversation has no user message")]
    EmptyMessage,

    #[error("Document retrieval failed: {0}")]
    Retrieval(#[source] BoxError),

    #[error("Reply generation failed: {0}")]
    Generation(#[source] BoxError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// One chat turn for a tenant, with the tenant's generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub tenant_id: String,
    /// Conversation so far; the last message is the one being answered.
    pub messages: Vec<ChatMessage>,
    pub model: String,
    /// Tenant-specific instructions for the LLM.
    #[serde(default)]
    pub specifications: String,
    /// Reply the LLM should give when the question is out of scope.
    #[serde(default)]
    pub rejection_message: String,
    #[serde(default)]
    pub temperature: f64,
}

/// Input handed to the [`ReplyGenerator`] on a cache miss.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Document chunks retrieved for the user message.
    pub context: Vec<String>,
    pub specifications: String,
    pub rejection_message: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub related_questions: Vec<String>,
    /// True when the reply came from the query cache.
    pub from_cache: bool,
}

/// Finds document chunks relevant to a query within one tenant's corpus.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(&self, tenant_id: &str, query: &str) -> Result<Vec<String>, BoxError>;
}

/// Produces the raw LLM output for a conversation.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, BoxError>;
}

/// Answer and follow-up questions extracted from raw LLM output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub reply: String,
    pub related_questions: Vec<String>,
}

#[derive(Deserialize)]
struct LlmAnswer {
    answer: String,
    #[serde(default)]
    related_questions: Option<Vec<String>>,
}

/// Parse LLM output of the form `{"answer": ..., "related_questions": [...]}`,
/// optionally wrapped in a ```json fence.
///
/// Output that is not such an object is returned as the reply text, with the
/// fence markers removed and no related questions.
pub fn parse_llm_response(raw: &str) -> ParsedReply {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    match serde_json::from_str::<LlmAnswer>(cleaned) {
        Ok(parsed) => ParsedReply {
            reply: parsed.answer,
            related_questions: parsed.related_questions.unwrap_or_default(),
        },
        Err(e) => {
            tracing::debug!(error = %e, "LLM output is not structured JSON, using raw text");
            ParsedReply {
                reply: cleaned.to_string(),
                related_questions: Vec::new(),
            }
        }
    }
}

/// Answers chat messages, consulting the query cache before the LLM.
pub struct ChatOrchestrator {
    query_cache: Arc<QueryCache>,
    retriever: Arc<dyn DocumentRetriever>,
    generator: Arc<dyn ReplyGenerator>,
}

impl ChatOrchestrator {
    pub fn new(
        query_cache: Arc<QueryCache>,
        retriever: Arc<dyn DocumentRetriever>,
        generator: Arc<dyn ReplyGenerator>,
    ) -> Self {
        Self {
            query_cache,
            retriever,
            generator,
        }
    }

    pub async fn handle_message(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let user_message = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or(ChatError::EmptyMessage)?;
        let tenant_id = request.tenant_id.as_str();

        if let Some(cached) = self
            .query_cache
            .get_most_similar_cached_reply(tenant_id, &user_message)
            .await
        {
            tracing::debug!(tenant_id = %tenant_id, "Answered from query cache");
            return Ok(ChatReply {
                reply: cached.response,
                related_questions: cached.related_questions,
                from_cache: true,
            });
        }

        let context = self
            .retriever
            .retrieve(tenant_id, &user_message)
            .await
            .map_err(ChatError::Retrieval)?;

        let raw = self
            .generator
            .generate(GenerationRequest {
                model: request.model.clone(),
                messages: request.messages.clone(),
                context,
                specifications: request.specifications.clone(),
                rejection_message: request.rejection_message.clone(),
                temperature: request.temperature,
            })
            .await
            .map_err(ChatError::Generation)?;

        let parsed = parse_llm_response(&raw);

        if parsed.reply.trim().is_empty() {
            tracing::debug!(tenant_id = %tenant_id, "Empty reply, not caching");
        } else {
            self.query_cache
                .cache_reply(
                    tenant_id,
                    &user_message,
                    &parsed.reply,
                    &parsed.related_questions,
                )
                .await;
        }

        Ok(ChatReply {
            reply: parsed.reply,
            related_questions: parsed.related_questions,
            from_cache: false,
        })
    }
}

impl fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("query_cache", &self.query_cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use rstest::rstest;

    use super::*;
    use crate::{
        cache::{EmbeddingService, HashingEmbedder, MemoryCache},
        config::{MemoryCacheConfig, QueryCacheConfig},
    };

    struct StaticRetriever {
        chunks: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentRetriever for StaticRetriever {
        async fn retrieve(&self, _tenant_id: &str, _query: &str) -> Result<Vec<String>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.chunks.clone())
        }
    }

    struct FailingRetriever;

    #[async_trait]
    impl DocumentRetriever for FailingRetriever {
        async fn retrieve(&self, _tenant_id: &str, _query: &str) -> Result<Vec<String>, BoxError> {
            Err("vector store unavailable".into())
        }
    }

    struct ScriptedGenerator {
        output: String,
        calls: AtomicUsize,
        last_request: Mutex<Option<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        fn new(output: &str) -> Self {
            Self {
                output: output.to_string(),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ReplyGenerator for ScriptedGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<String, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request);
            Ok(self.output.clone())
        }
    }

    fn query_cache() -> Arc<QueryCache> {
        Arc::new(QueryCache::new(
            Arc::new(MemoryCache::new(&MemoryCacheConfig::default())),
            Arc::new(EmbeddingService::new(HashingEmbedder::new(256))),
            QueryCacheConfig::default(),
        ))
    }

    fn request(tenant_id: &str, message: &str) -> ChatRequest {
        ChatRequest {
            tenant_id: tenant_id.to_string(),
            messages: vec![ChatMessage::user(message)],
            model: "gpt-4o-mini".to_string(),
            specifications: "Answer briefly.".to_string(),
            rejection_message: "I can only help with store questions.".to_string(),
            temperature: 0.2,
        }
    }

    fn retriever() -> Arc<StaticRetriever> {
        Arc::new(StaticRetriever {
            chunks: vec!["Opening hours: 9-5 on weekdays.".to_string()],
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_second_identical_message_served_from_cache() {
        let retriever = retriever();
        let generator = Arc::new(ScriptedGenerator::new(
            r#"```json
{"answer": "We're open 9-5", "related_questions": ["Are you open on weekends?"]}
```"#,
        ));
        let orchestrator =
            ChatOrchestrator::new(query_cache(), retriever.clone(), generator.clone());

        let first = orchestrator
            .handle_message(request("bot1", "What are your hours?"))
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.reply, "We're open 9-5");
        assert_eq!(first.related_questions, vec!["Are you open on weekends?"]);

        let second = orchestrator
            .handle_message(request("bot1", "what are your hours"))
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.reply, first.reply);
        assert_eq!(second.related_questions, first.related_questions);

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generation_request_carries_context_and_settings() {
        let generator = Arc::new(ScriptedGenerator::new("plain answer"));
        let orchestrator = ChatOrchestrator::new(query_cache(), retriever(), generator.clone());

        orchestrator
            .handle_message(request("bot1", "When do you open?"))
            .await
            .unwrap();

        let sent = generator.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(sent.model, "gpt-4o-mini");
        assert_eq!(sent.context, vec!["Opening hours: 9-5 on weekdays."]);
        assert_eq!(sent.messages, vec![ChatMessage::user("When do you open?")]);
        assert_eq!(sent.rejection_message, "I can only help with store questions.");
        assert_eq!(sent.temperature, 0.2);
    }

    #[tokio::test]
    async fn test_tenants_do_not_share_replies() {
        let generator = Arc::new(ScriptedGenerator::new(r#"{"answer": "bot1 answer"}"#));
        let orchestrator = ChatOrchestrator::new(query_cache(), retriever(), generator.clone());

        orchestrator
            .handle_message(request("bot1", "What are your hours?"))
            .await
            .unwrap();
        let other = orchestrator
            .handle_message(request("bot2", "What are your hours?"))
            .await
            .unwrap();

        assert!(!other.from_cache);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_reply_is_not_cached() {
        let generator = Arc::new(ScriptedGenerator::new("   "));
        let cache = query_cache();
        let orchestrator = ChatOrchestrator::new(cache.clone(), retriever(), generator.clone());

        let reply = orchestrator
            .handle_message(request("bot1", "hello"))
            .await
            .unwrap();
        assert_eq!(reply.reply, "");
        assert!(cache.cached_entries("bot1").await.is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_an_error() {
        let generator = Arc::new(ScriptedGenerator::new("unused"));
        let orchestrator =
            ChatOrchestrator::new(query_cache(), Arc::new(FailingRetriever), generator.clone());

        let err = orchestrator
            .handle_message(request("bot1", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Retrieval(_)), "{err:?}");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_conversation_is_rejected() {
        let orchestrator = ChatOrchestrator::new(
            query_cache(),
            retriever(),
            Arc::new(ScriptedGenerator::new("unused")),
        );

        let mut empty = request("bot1", "");
        let err = orchestrator.handle_message(empty.clone()).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));

        empty.messages.clear();
        let err = orchestrator.handle_message(empty).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
    }

    #[rstest]
    #[case::fenced_json(
        "```json\n{\"answer\": \"Hi\", \"related_questions\": [\"More?\"]}\n```",
        "Hi",
        &["More?"]
    )]
    #[case::bare_json("{\"answer\": \"Hi\"}", "Hi", &[])]
    #[case::null_related("{\"answer\": \"Hi\", \"related_questions\": null}", "Hi", &[])]
    #[case::plain_text("  Just text.  ", "Just text.", &[])]
    #[case::fenced_plain_text("```json\nnot json\n```", "not json", &[])]
    #[case::missing_answer("{\"reply\": \"Hi\"}", "{\"reply\": \"Hi\"}", &[])]
    fn test_parse_llm_response(
        #[case] raw: &str,
        #[case] reply: &str,
        #[case] related: &[&str],
    ) {
        let parsed = parse_llm_response(raw);
        assert_eq!(parsed.reply, reply);
        assert_eq!(parsed.related_questions, related);
    }
}
