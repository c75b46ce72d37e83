//! Knowledge 모듈 - 문서 코퍼스 검색
//!
//! - Corpus: 코퍼스 테이블 정의 + 검색 SQL 생성 (식별자 검증)
//! - Vector: 임베딩 기반 시맨틱 검색 (거리 오름차순)
//! - Keyword: BM25 키워드 검색 (score 내림차순)
//! - Store: 코퍼스 쿼리 트레이트 + 로컬 SQLite 구현
//! - Postgres: pgvector / pg_textsearch 구현

mod corpus;
mod keyword;
mod postgres;
mod store;
mod vector;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use corpus::{
    format_vector, keyword_query, vector_query, BindValue, ChunkId, Corpora, CorpusConfig,
    CorpusLayout, CorpusQuery, CorpusTables, DistanceMetric, Ident, IdKind, MetadataSource,
};
pub use keyword::{KeywordSearchResult, KeywordSearchService};
pub use postgres::PgCorpusStore;
pub use store::{CorpusStore, LocalCorpusStore, NewChunk, StoreStats};
pub use vector::{
    cosine_similarity, distance, VectorFilters, VectorSearchResult, VectorSearchService,
    DEFAULT_LIMIT, EMBEDDING_DIMENSION,
};
