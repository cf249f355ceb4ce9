//! # wiki-digest
//!
//! Ambiguity-aware encyclopedia digests.
//!
//! A free-text question goes through four stages. A language model extracts
//! a topic and scores how unambiguous it is. Low-confidence topics go
//! through a clarification dialogue. The settled topic is resolved to a
//! Wikipedia article, and the article is reduced to a digest of at most 300
//! words. Queries and digests are stored in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌────────────────────┐   ┌──────────────┐
//! │ TopicResolver│──▶│ Disambiguator │──▶│ KnowledgeRetriever │──▶│ DigestBuilder│
//! │  (llm)       │   │  (llm, user)  │   │  (MediaWiki, llm)  │   │  (llm)       │
//! └──────────────┘   └───────────────┘   └────────────────────┘   └──────┬───────┘
//!                                                                        ▼
//!                      ┌──────────┐       ┌──────────┐             ┌──────────┐
//!                      │   CLI    │       │   HTTP   │────────────▶│  SQLite  │
//!                      └──────────┘       └──────────┘             └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors tagged with component and operation |
//! | [`llm`] | Chat model abstraction (OpenAI, Ollama) |
//! | [`wiki`] | Encyclopedia abstraction and MediaWiki client |
//! | [`resolver`] | Topic extraction and confidence gating |
//! | [`disambiguation`] | Option generation and reply resolution |
//! | [`retriever`] | Topic → article resolution with fallbacks |
//! | [`chunk`] | Recursive character text splitter |
//! | [`digest`] | Map-reduce summarization |
//! | [`store`] | Query and result persistence |
//! | [`pipeline`] | Orchestration of the stages |
//! | [`server`] | HTTP API |
//! | [`cli`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`testing`] | Scripted model and in-memory encyclopedia for tests |

pub mod chunk;
pub mod cli;
pub mod config;
pub mod db;
pub mod digest;
pub mod disambiguation;
pub mod error;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod retriever;
pub mod server;
pub mod store;
pub mod testing;
pub mod wiki;
