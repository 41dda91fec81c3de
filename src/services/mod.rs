pub mod chat;

pub use chat::{
    BoxError, ChatError, ChatMessage, ChatOrchestrator, ChatReply, ChatRequest,
    DocumentRetriever, GenerationRequest, ParsedReply, ReplyGenerator, parse_llm_response,
};
