//! PostgreSQL Corpus Store - pgvector + pg_textsearch 쿼리
//!
//! SQL 문자열은 corpus.rs에서 생성하고, 여기서는 바인드와 행 디코딩만 담당합니다.
//! source: https://github.com/pgvector/pgvector

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::corpus::{
    keyword_query, vector_query, BindValue, ChunkId, CorpusConfig, CorpusQuery, IdKind,
};
use super::keyword::KeywordSearchResult;
use super::store::CorpusStore;
use super::vector::{VectorFilters, VectorSearchResult};

/// 커넥션 획득 타임아웃
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// PostgreSQL 코퍼스 저장소
#[derive(Clone)]
pub struct PgCorpusStore {
    pool: PgPool,
}

impl PgCorpusStore {
    /// 커넥션 풀 생성
    ///
    /// # Arguments
    /// * `database_url` - postgres://... 연결 문자열
    /// * `max_connections` - 풀 최대 크기
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        tracing::info!("Connected to PostgreSQL (max_connections={})", max_connections);
        Ok(Self { pool })
    }

    /// 기존 풀 사용
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, query: &CorpusQuery) -> Result<Vec<PgRow>> {
        let mut q = sqlx::query(query.sql.as_str());
        for value in &query.binds {
            q = match value {
                BindValue::Vector(v) => q.bind(v.clone()),
                BindValue::Int(v) => q.bind(*v),
                BindValue::Int64(v) => q.bind(*v),
                BindValue::Text(v) => q.bind(v.clone()),
                BindValue::TextArray(v) => q.bind(v.clone()),
            };
        }

        q.fetch_all(&self.pool).await.context("Corpus query failed")
    }
}

/// 코퍼스 ID 타입에 맞춰 디코딩
fn id_of(row: &PgRow, kind: IdKind) -> Result<ChunkId> {
    Ok(match kind {
        IdKind::Integer => ChunkId::Int(row.try_get("id")?),
        IdKind::Text => ChunkId::Text(row.try_get("id")?),
    })
}

/// NULL 메타데이터는 빈 객체로 전달
fn metadata_of(row: &PgRow) -> Result<String> {
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(metadata.unwrap_or_else(|| "{}".to_string()))
}

#[async_trait]
impl CorpusStore for PgCorpusStore {
    async fn nearest(
        &self,
        corpus: &CorpusConfig,
        embedding: &[f32],
        limit: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<VectorSearchResult>> {
        let query = vector_query(corpus, embedding, limit, filters);
        let rows = self.fetch(&query).await?;

        rows.iter()
            .map(|row| -> Result<VectorSearchResult> {
                Ok(VectorSearchResult {
                    id: id_of(row, corpus.id_kind)?,
                    content: row.try_get("content")?,
                    metadata: metadata_of(row)?,
                    distance: row.try_get("distance")?,
                })
            })
            .collect()
    }

    async fn keyword(
        &self,
        corpus: &CorpusConfig,
        keywords: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>> {
        let query = keyword_query(corpus, keywords, limit)?;
        let rows = self.fetch(&query).await?;

        rows.iter()
            .map(|row| -> Result<KeywordSearchResult> {
                Ok(KeywordSearchResult {
                    id: id_of(row, corpus.id_kind)?,
                    content: row.try_get("content")?,
                    metadata: metadata_of(row)?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
