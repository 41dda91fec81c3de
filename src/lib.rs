//! Per-tenant query-response cache with semantic matching for RAG chatbots.
//!
//! The [`cache::QueryCache`] keeps a short, most-recent-first window of
//! answered queries per tenant and serves a cached reply when a new query is
//! an exact or semantically close match. [`services::ChatOrchestrator`] wires
//! it in front of document retrieval and LLM generation.

pub mod cache;
pub mod config;
pub mod observability;
pub mod services;
