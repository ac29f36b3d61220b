//! RAG Services: colaboradores padrão do motor
//!
//! Concrete implementations of the collaborator traits in `rag-core`:
//!
//! - [`OpenAiReasoner`]: chat completions against an OpenAI-compatible endpoint
//! - [`JsonDirKnowledgeBase`] / [`StaticKnowledgeBase`]: knowledge-base records
//! - [`InMemoryIndex`]: lexical similarity search built from a knowledge base
//! - [`VectorIndex`]: embedding similarity search over [`OpenAiEmbeddings`]
//! - [`LexicalReranker`]: query-term coverage scoring

pub mod embeddings;
pub mod index;
pub mod knowledge_base;
pub mod openai;
pub mod rerank;
pub mod text;

pub use embeddings::{Embedder, OpenAiEmbeddings, VectorIndex};
pub use index::InMemoryIndex;
pub use knowledge_base::{JsonDirKnowledgeBase, StaticKnowledgeBase};
pub use openai::OpenAiReasoner;
pub use rerank::LexicalReranker;
