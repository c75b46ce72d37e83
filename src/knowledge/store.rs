//! Corpus Store - 코퍼스 쿼리 인터페이스 및 로컬(SQLite) 구현
//!
//! `CorpusStore`는 벡터 최근접 검색과 BM25 키워드 검색 두 가지 쿼리를 제공합니다.
//! - `PgCorpusStore` (postgres.rs): pgvector + pg_textsearch
//! - `LocalCorpusStore` (이 파일): rusqlite + FTS5, 오프라인 코퍼스 및 테스트용
//!
//! 로컬 저장 위치 기본값: ~/.pg-docs-rag/corpus.db

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;

use super::corpus::{ChunkId, CorpusConfig, DistanceMetric};
use super::keyword::KeywordSearchResult;
use super::vector::{distance, VectorFilters, VectorSearchResult};

// ============================================================================
// CorpusStore Trait
// ============================================================================

/// 코퍼스 쿼리 트레이트 (async)
///
/// 구현체는 결과를 정렬된 상태로 반환해야 합니다.
/// - `nearest`: 거리 오름차순
/// - `keyword`: score 내림차순 (score = -bm25)
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// 벡터 최근접 검색 (필터 적용 후 정렬)
    async fn nearest(
        &self,
        corpus: &CorpusConfig,
        embedding: &[f32],
        limit: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<VectorSearchResult>>;

    /// BM25 키워드 검색
    async fn keyword(
        &self,
        corpus: &CorpusConfig,
        keywords: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>>;

    /// 백엔드 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Types
// ============================================================================

/// 새 청크 입력용 구조체
#[derive(Debug, Clone, Default)]
pub struct NewChunk {
    /// 문자열 청크 ID (없으면 SQLite rowid를 정수 ID로 사용)
    pub key: Option<String>,
    pub content: String,
    /// 메타데이터 JSON 문자열 (그대로 저장/반환)
    pub metadata: String,
    pub version: Option<i32>,
    pub tags: Vec<String>,
    pub token_count: Option<i32>,
    pub embedding: Option<Vec<f32>>,
}

/// 로컬 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub embedded_count: usize,
    pub corpus_counts: BTreeMap<String, usize>,
    pub db_path: PathBuf,
}

// ============================================================================
// LocalCorpusStore
// ============================================================================

/// 로컬 코퍼스 저장소
///
/// SQLite에 청크/임베딩을 저장하고 FTS5로 키워드 검색을 제공합니다.
/// 벡터 거리는 SQL로 후보를 필터링한 뒤 Rust에서 계산합니다.
#[derive(Clone)]
pub struct LocalCorpusStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl LocalCorpusStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_key TEXT,
                corpus TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                version INTEGER,
                tags TEXT NOT NULL DEFAULT '[]',
                token_count INTEGER,
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_corpus ON chunks(corpus, version);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_key ON chunks(corpus, chunk_key);
            "#,
        )
        .context("Failed to create chunks table")?;

        // FTS5 가상 테이블 (키워드 검색용)
        // source: https://www.sqlite.org/fts5.html
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                content,
                content=chunks,
                content_rowid=id
            );

            CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content)
                VALUES('delete', old.id, old.content);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content)
                VALUES('delete', old.id, old.content);
                INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
            END;
            "#,
        )
        .context("Failed to create FTS5 index")?;

        tracing::debug!("Local corpus store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 청크 저장
    pub fn add_chunk(&self, corpus: &str, chunk: NewChunk) -> Result<i64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let tags = serde_json::to_string(&chunk.tags).context("Failed to encode tags")?;
        let embedding = chunk.embedding.as_deref().map(encode_embedding);
        let metadata = if chunk.metadata.is_empty() {
            "{}".to_string()
        } else {
            chunk.metadata
        };

        conn.execute(
            "INSERT INTO chunks (chunk_key, corpus, content, metadata, version, tags, token_count, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                chunk.key,
                corpus,
                chunk.content,
                metadata,
                chunk.version,
                tags,
                chunk.token_count,
                embedding,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to insert chunk")?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Added chunk {} to corpus '{}'", id, corpus);

        Ok(id)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        let embedded_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare("SELECT corpus, COUNT(*) FROM chunks GROUP BY corpus")?;
        let corpus_counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(StoreStats {
            chunk_count: chunk_count as usize,
            embedded_count: embedded_count as usize,
            corpus_counts,
            db_path: self.db_path.clone(),
        })
    }

    /// 후보 청크 조회 (corpus/version 필터는 SQL, tags 필터는 Rust)
    fn candidates(&self, corpus: &str, filters: &VectorFilters) -> Result<Vec<Candidate>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, chunk_key, content, metadata, tags, embedding FROM chunks
             WHERE corpus = ?1
               AND embedding IS NOT NULL
               AND (?2 IS NULL OR version = ?2)
             ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![corpus, filters.version], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut candidates = Vec::with_capacity(rows.len());
        for (rowid, key, content, metadata, tags, blob) in rows {
            let tags: Vec<String> = serde_json::from_str(&tags)
                .with_context(|| format!("Invalid tags on chunk {}", rowid))?;
            candidates.push(Candidate {
                id: chunk_id(rowid, key),
                content,
                metadata,
                tags,
                embedding: decode_embedding(&blob),
            });
        }

        Ok(candidates)
    }

    /// 벡터 최근접 검색 (블로킹)
    fn nearest_blocking(
        &self,
        corpus: &str,
        metric: DistanceMetric,
        embedding: &[f32],
        limit: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<VectorSearchResult>> {
        let mut results: Vec<VectorSearchResult> = self
            .candidates(corpus, filters)?
            .into_iter()
            .filter(|c| filters.tags.is_empty() || c.tags.iter().any(|t| filters.tags.contains(t)))
            .filter_map(|c| match distance(metric, &c.embedding, embedding) {
                Some(d) => Some(VectorSearchResult {
                    id: c.id,
                    content: c.content,
                    metadata: c.metadata,
                    distance: d,
                }),
                None => {
                    tracing::warn!(
                        "Skipping chunk {}: embedding dimension {} != query dimension {}",
                        c.id,
                        c.embedding.len(),
                        embedding.len()
                    );
                    None
                }
            })
            .collect();

        // stable sort: 동일 거리는 행 순서 유지
        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        results.truncate(limit);

        Ok(results)
    }

    /// FTS5 키워드 검색 (블로킹)
    ///
    /// FTS5 `bm25()`는 작을수록 관련도가 높으므로 부호를 뒤집어 score로 사용합니다.
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    fn keyword_blocking(
        &self,
        corpus: &str,
        keywords: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>> {
        let escaped_query = escape_fts5_query(keywords);
        if escaped_query.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT c.id, c.chunk_key, c.content, c.metadata, -bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.rowid
            WHERE chunks_fts MATCH ?1 AND c.corpus = ?2
            ORDER BY bm25(chunks_fts)
            LIMIT ?3
            "#,
        )?;

        let results = stmt
            .query_map(params![escaped_query, corpus, limit as i64], |row| {
                Ok(KeywordSearchResult {
                    id: chunk_id(row.get(0)?, row.get(1)?),
                    content: row.get(2)?,
                    metadata: row.get(3)?,
                    score: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read FTS5 results")?;

        Ok(results)
    }
}

/// 벡터 검색 후보 행
struct Candidate {
    id: ChunkId,
    content: String,
    metadata: String,
    tags: Vec<String>,
    embedding: Vec<f32>,
}

#[async_trait]
impl CorpusStore for LocalCorpusStore {
    async fn nearest(
        &self,
        corpus: &CorpusConfig,
        embedding: &[f32],
        limit: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<VectorSearchResult>> {
        let store = self.clone();
        let corpus_name = corpus.name.clone();
        let metric = corpus.metric;
        let embedding = embedding.to_vec();
        let filters = filters.clone();

        tokio::task::spawn_blocking(move || {
            store.nearest_blocking(&corpus_name, metric, &embedding, limit, &filters)
        })
        .await
        .context("Local vector search task failed")?
    }

    async fn keyword(
        &self,
        corpus: &CorpusConfig,
        keywords: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>> {
        let store = self.clone();
        let corpus_name = corpus.name.clone();
        let keywords = keywords.to_string();

        tokio::task::spawn_blocking(move || store.keyword_blocking(&corpus_name, &keywords, limit))
            .await
            .context("Local keyword search task failed")?
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자열 키가 있으면 문자열 ID, 없으면 rowid
fn chunk_id(rowid: i64, key: Option<String>) -> ChunkId {
    match key {
        Some(key) => ChunkId::Text(key),
        None => ChunkId::Int(rowid),
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// FTS5 쿼리 이스케이프
///
/// 특수 문자를 제거하고 단어별 구문(phrase)으로 감싼 뒤 OR로 연결합니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================
