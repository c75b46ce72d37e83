//! pg-docs-rag - PostgreSQL / TimescaleDB 문서 검색 서브시스템
//!
//! pgvector 시맨틱 검색 + BM25 키워드 검색 + 스킬/가이드 문서 저장소를
//! 도구 호출 형태(`RetrievalFacade`)로 제공합니다.

pub mod cli;
pub mod config;
pub mod content;
pub mod embedding;
pub mod error;
pub mod facade;
pub mod knowledge;

// Re-exports
pub use config::{get_data_dir, Config, EmbeddingConfig};
pub use content::{ContentDocument, ContentEntry, ContentStore};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, OpenAiEmbedding};
pub use error::{Result, RetrievalError};
pub use facade::{ErrorCode, FacadeError, RetrievalFacade, ToolSpec};
pub use knowledge::{
    Corpora, CorpusConfig, CorpusStore, KeywordSearchResult, KeywordSearchService,
    LocalCorpusStore, PgCorpusStore, VectorFilters, VectorSearchResult, VectorSearchService,
};
