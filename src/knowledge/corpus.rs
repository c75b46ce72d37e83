//! Corpus - 코퍼스 테이블 정의 및 검색 SQL 생성
//!
//! 코퍼스마다 청크 테이블 형태가 다릅니다.
//! - Flat: 청크 행에 version 컬럼이 직접 존재 (예: docs.postgres)
//! - Paged: 청크가 page 테이블에 속하고 version/tags는 page에 존재 (예: docs.timescale_chunks)
//!
//! 스키마/테이블 이름은 시작 시 한 번 검증된 설정값만 SQL에 들어갑니다.
//! 사용자 입력(프롬프트 임베딩, 키워드, 필터 값)은 항상 바인드 파라미터로만 전달됩니다.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

use super::vector::VectorFilters;

// ============================================================================
// Identifier
// ============================================================================

/// 검증된 SQL 식별자 (스키마, 테이블, 컬럼, 인덱스 이름)
///
/// `^[A-Za-z_][A-Za-z0-9_]{0,62}$` 패턴만 허용합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
        });

        if pattern.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(RetrievalError::Config(format!(
                "invalid SQL identifier: {:?}",
                name
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Chunk Identifier
// ============================================================================

/// 청크 ID (코퍼스마다 정수 또는 문자열)
///
/// 블로그 청크는 `<slug>-chunk-<n>` 형태의 문자열 ID를 사용합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkId {
    Int(i64),
    Text(String),
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{}", id),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for ChunkId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for ChunkId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

/// 청크 테이블 `id` 컬럼 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// integer / bigint / serial
    Integer,
    /// text
    Text,
}

impl IdKind {
    /// SELECT 절 캐스팅
    fn cast(&self) -> &'static str {
        match self {
            Self::Integer => "bigint",
            Self::Text => "text",
        }
    }
}

// ============================================================================
// Corpus Definition
// ============================================================================

/// 코퍼스 테이블/인덱스 이름 (설정으로 변경 가능)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusTables {
    pub postgres: String,
    pub tiger_chunks: String,
    pub tiger_pages: String,
    pub tiger_bm25_index: String,
    pub blog_chunks: String,
    pub blog_pages: String,
}

impl Default for CorpusTables {
    fn default() -> Self {
        Self {
            postgres: "postgres".to_string(),
            tiger_chunks: "timescale_chunks".to_string(),
            tiger_pages: "timescale_pages".to_string(),
            tiger_bm25_index: "timescale_chunks_content_bm25_idx".to_string(),
            blog_chunks: "tiger_blog_chunks".to_string(),
            blog_pages: "tiger_blog_pages".to_string(),
        }
    }
}

/// 벡터 거리 함수 (pgvector 연산자)
/// source: https://github.com/pgvector/pgvector#querying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// 코사인 거리 `<=>` (0 ~ 2)
    Cosine,
    /// 음의 내적 `<#>`
    InnerProduct,
    /// 유클리드 거리 `<->`
    L2,
}

impl DistanceMetric {
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Cosine => "<=>",
            Self::InnerProduct => "<#>",
            Self::L2 => "<->",
        }
    }
}

/// 메타데이터 컬럼 구성
#[derive(Debug, Clone)]
pub enum MetadataSource {
    /// 청크 테이블의 JSON(B) 컬럼을 그대로 사용
    Column(Ident),
    /// 여러 컬럼을 `json_build_object`로 묶음
    Fields(Vec<Ident>),
}

/// 청크 테이블 형태
#[derive(Debug, Clone)]
pub enum CorpusLayout {
    /// 단일 테이블
    Flat { version_column: Option<Ident> },
    /// chunk -> page 조인 (필터 컬럼은 page 테이블에 존재)
    Paged {
        page_table: Ident,
        page_key: Ident,
        version_column: Option<Ident>,
        tags_column: Option<Ident>,
    },
}

/// 코퍼스 설정
#[derive(Debug, Clone)]
pub struct CorpusConfig {
    /// 코퍼스 이름 (로컬 저장소의 구분 키로도 사용)
    pub name: String,
    pub schema: Ident,
    pub chunk_table: Ident,
    pub id_kind: IdKind,
    pub layout: CorpusLayout,
    pub metadata: MetadataSource,
    pub metric: DistanceMetric,
    /// BM25 인덱스 이름 (키워드 검색 사용 시 필수)
    pub bm25_index: Option<Ident>,
}

impl CorpusConfig {
    /// PostgreSQL 공식 문서 (버전별 청크, 단일 테이블)
    pub fn postgres_docs(schema: &str, table: &str) -> Result<Self> {
        Ok(Self {
            name: "postgres".to_string(),
            schema: Ident::new(schema)?,
            chunk_table: Ident::new(table)?,
            id_kind: IdKind::Integer,
            layout: CorpusLayout::Flat {
                version_column: Some(Ident::new("version")?),
            },
            metadata: MetadataSource::Fields(vec![
                Ident::new("header")?,
                Ident::new("header_path")?,
                Ident::new("source_url")?,
                Ident::new("token_count")?,
            ]),
            metric: DistanceMetric::Cosine,
            bm25_index: None,
        })
    }

    /// Tiger/TimescaleDB 제품 문서 (page 조인)
    pub fn tiger_docs(
        schema: &str,
        chunk_table: &str,
        page_table: &str,
        bm25_index: &str,
    ) -> Result<Self> {
        Ok(Self {
            name: "tiger".to_string(),
            schema: Ident::new(schema)?,
            chunk_table: Ident::new(chunk_table)?,
            id_kind: IdKind::Integer,
            layout: CorpusLayout::Paged {
                page_table: Ident::new(page_table)?,
                page_key: Ident::new("page_id")?,
                version_column: None,
                tags_column: None,
            },
            metadata: MetadataSource::Column(Ident::new("metadata")?),
            metric: DistanceMetric::Cosine,
            bm25_index: Some(Ident::new(bm25_index)?),
        })
    }

    /// Tiger 블로그 (page에 tags 배열, 문자열 청크 ID)
    pub fn tiger_blog(schema: &str, chunk_table: &str, page_table: &str) -> Result<Self> {
        Ok(Self {
            name: "blog".to_string(),
            schema: Ident::new(schema)?,
            chunk_table: Ident::new(chunk_table)?,
            id_kind: IdKind::Text,
            layout: CorpusLayout::Paged {
                page_table: Ident::new(page_table)?,
                page_key: Ident::new("page_id")?,
                version_column: None,
                tags_column: Some(Ident::new("tags")?),
            },
            metadata: MetadataSource::Column(Ident::new("metadata")?),
            metric: DistanceMetric::Cosine,
            bm25_index: None,
        })
    }

    pub fn supports_version(&self) -> bool {
        match &self.layout {
            CorpusLayout::Flat { version_column } => version_column.is_some(),
            CorpusLayout::Paged { version_column, .. } => version_column.is_some(),
        }
    }

    pub fn supports_tags(&self) -> bool {
        matches!(
            &self.layout,
            CorpusLayout::Paged {
                tags_column: Some(_),
                ..
            }
        )
    }

    /// version 필터 대상 컬럼 (테이블 별칭 포함)
    fn version_expr(&self) -> Option<String> {
        match &self.layout {
            CorpusLayout::Flat { version_column } => {
                version_column.as_ref().map(|c| format!("c.{}", c))
            }
            CorpusLayout::Paged { version_column, .. } => {
                version_column.as_ref().map(|c| format!("p.{}", c))
            }
        }
    }

    fn tags_expr(&self) -> Option<String> {
        match &self.layout {
            CorpusLayout::Paged { tags_column, .. } => {
                tags_column.as_ref().map(|c| format!("p.{}", c))
            }
            CorpusLayout::Flat { .. } => None,
        }
    }

    fn metadata_expr(&self) -> String {
        match &self.metadata {
            MetadataSource::Column(col) => format!("c.{}::text", col),
            MetadataSource::Fields(cols) => {
                let pairs = cols
                    .iter()
                    .map(|c| format!("'{}', c.{}", c, c))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("json_build_object({})::text", pairs)
            }
        }
    }

    /// FROM 절 (필터가 page 컬럼을 참조할 때만 조인)
    fn from_clause(&self, needs_page: bool) -> String {
        let chunks = format!("{}.{} c", self.schema, self.chunk_table);
        match &self.layout {
            CorpusLayout::Paged {
                page_table,
                page_key,
                ..
            } if needs_page => format!(
                "{} JOIN {}.{} p ON p.id = c.{}",
                chunks, self.schema, page_table, page_key
            ),
            _ => chunks,
        }
    }
}

/// 기본 제공 코퍼스 묶음
#[derive(Debug, Clone)]
pub struct Corpora {
    pub postgres: CorpusConfig,
    pub tiger: CorpusConfig,
    pub blog: CorpusConfig,
}

impl Corpora {
    /// 기본 테이블 이름으로 생성
    pub fn builtin(schema: &str) -> Result<Self> {
        Self::new(schema, &CorpusTables::default())
    }

    /// 모든 식별자를 검증하며 생성
    pub fn new(schema: &str, tables: &CorpusTables) -> Result<Self> {
        Ok(Self {
            postgres: CorpusConfig::postgres_docs(schema, &tables.postgres)?,
            tiger: CorpusConfig::tiger_docs(
                schema,
                &tables.tiger_chunks,
                &tables.tiger_pages,
                &tables.tiger_bm25_index,
            )?,
            blog: CorpusConfig::tiger_blog(schema, &tables.blog_chunks, &tables.blog_pages)?,
        })
    }
}

// ============================================================================
// Query Construction
// ============================================================================

/// 바인드 파라미터 값
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// pgvector 텍스트 표현 (`[0.1,0.2,...]`), `$n::vector`로 캐스팅
    Vector(String),
    Int(i32),
    Int64(i64),
    Text(String),
    TextArray(Vec<String>),
}

/// 생성된 SQL과 바인드 값 (순서대로 $1, $2, ...)
#[derive(Debug, Clone)]
pub struct CorpusQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

impl CorpusQuery {
    fn bind(&mut self, value: BindValue) -> String {
        self.binds.push(value);
        format!("${}", self.binds.len())
    }
}

/// 임베딩을 pgvector 리터럴로 변환
pub fn format_vector(embedding: &[f32]) -> String {
    let values = embedding
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{}]", values)
}

/// 벡터 유사도 검색 SQL (거리 오름차순)
///
/// 필터는 정렬 이전에 WHERE 절로 적용됩니다.
/// `filters`는 이미 코퍼스가 지원하는 항목만 남아 있어야 합니다.
pub fn vector_query(
    corpus: &CorpusConfig,
    embedding: &[f32],
    limit: usize,
    filters: &VectorFilters,
) -> CorpusQuery {
    let mut query = CorpusQuery {
        sql: String::new(),
        binds: Vec::new(),
    };

    let vector_param = query.bind(BindValue::Vector(format_vector(embedding)));
    let distance = format!(
        "c.embedding {} {}::vector",
        corpus.metric.operator(),
        vector_param
    );

    let mut conditions = vec!["c.embedding IS NOT NULL".to_string()];
    let mut needs_page = false;

    if let (Some(version), Some(column)) = (filters.version, corpus.version_expr()) {
        needs_page |= column.starts_with("p.");
        let param = query.bind(BindValue::Int(version));
        conditions.push(format!("{} = {}", column, param));
    }

    if !filters.tags.is_empty() {
        if let Some(column) = corpus.tags_expr() {
            needs_page = true;
            let param = query.bind(BindValue::TextArray(filters.tags.clone()));
            conditions.push(format!("{} && {}::text[]", column, param));
        }
    }

    let limit_param = query.bind(BindValue::Int64(limit as i64));

    query.sql = format!(
        "SELECT c.id::{id_cast} AS id, c.content, {metadata} AS metadata, \
         ({distance})::float8 AS distance \
         FROM {from} \
         WHERE {conditions} \
         ORDER BY {distance} \
         LIMIT {limit}",
        id_cast = corpus.id_kind.cast(),
        metadata = corpus.metadata_expr(),
        distance = distance,
        from = corpus.from_clause(needs_page),
        conditions = conditions.join(" AND "),
        limit = limit_param,
    );

    tracing::debug!("vector query for corpus '{}': {}", corpus.name, query.sql);
    query
}

/// BM25 키워드 검색 SQL (스코어 내림차순)
///
/// pg_textsearch의 `<@>` 연산자는 음수 BM25 값을 반환합니다(작을수록 관련도 높음).
/// 부호를 뒤집어 score는 클수록 관련도가 높도록 맞춥니다.
/// source: https://github.com/timescale/pg_textsearch
pub fn keyword_query(
    corpus: &CorpusConfig,
    keywords: &str,
    limit: usize,
) -> Result<CorpusQuery> {
    let index = corpus.bm25_index.as_ref().ok_or_else(|| {
        RetrievalError::Config(format!(
            "corpus '{}' has no BM25 index configured",
            corpus.name
        ))
    })?;

    let mut query = CorpusQuery {
        sql: String::new(),
        binds: Vec::new(),
    };

    let keywords_param = query.bind(BindValue::Text(keywords.to_string()));
    let limit_param = query.bind(BindValue::Int64(limit as i64));
    let rank = format!(
        "c.content <@> to_bm25query({}, '{}.{}')",
        keywords_param, corpus.schema, index
    );

    query.sql = format!(
        "SELECT c.id::{id_cast} AS id, c.content, {metadata} AS metadata, \
         (-({rank}))::float8 AS score \
         FROM {from} \
         ORDER BY {rank} \
         LIMIT {limit}",
        id_cast = corpus.id_kind.cast(),
        metadata = corpus.metadata_expr(),
        rank = rank,
        from = corpus.from_clause(false),
        limit = limit_param,
    );

    tracing::debug!("keyword query for corpus '{}': {}", corpus.name, query.sql);
    Ok(query)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_validation() {
        assert!(Ident::new("docs").is_ok());
        assert!(Ident::new("_tmp_1").is_ok());
        assert!(Ident::new("1docs").is_err());
        assert!(Ident::new("docs; DROP TABLE x").is_err());
        assert!(Ident::new("docs.postgres").is_err());
        assert!(Ident::new("").is_err());
        assert!(Ident::new(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_builtin_rejects_bad_schema() {
        assert!(Corpora::builtin("docs").is_ok());
        assert!(Corpora::builtin("docs\"--").is_err());
    }

    #[test]
    fn test_format_vector() {
        assert_eq!(format_vector(&[0.5, -1.0, 2.0]), "[0.5,-1,2]");
        assert_eq!(format_vector(&[]), "[]");
    }

    #[test]
    fn test_vector_query_flat_with_version() {
        let corpus = Corpora::builtin("docs").unwrap().postgres;
        let filters = VectorFilters {
            version: Some(17),
            tags: vec![],
        };
        let query = vector_query(&corpus, &[0.1, 0.2], 10, &filters);

        assert!(query.sql.starts_with("SELECT c.id::bigint AS id"));
        assert!(query.sql.contains("FROM docs.postgres c"));
        assert!(!query.sql.contains("JOIN"));
        assert!(query.sql.contains("c.version = $2"));
        assert!(query.sql.contains("ORDER BY c.embedding <=> $1::vector"));
        assert!(query.sql.contains("LIMIT $3"));
        assert!(query.sql.contains("json_build_object('header', c.header"));
        assert_eq!(
            query.binds,
            vec![
                BindValue::Vector("[0.1,0.2]".to_string()),
                BindValue::Int(17),
                BindValue::Int64(10),
            ]
        );
    }

    #[test]
    fn test_vector_query_paged_without_filters_skips_join() {
        let corpus = Corpora::builtin("docs").unwrap().tiger;
        let query = vector_query(&corpus, &[1.0], 5, &VectorFilters::default());

        assert!(query.sql.contains("FROM docs.timescale_chunks c"));
        assert!(!query.sql.contains("JOIN"));
        assert!(query.sql.contains("c.metadata::text"));
        assert_eq!(query.binds.len(), 2);
    }

    #[test]
    fn test_vector_query_tags_join_page() {
        let corpus = Corpora::builtin("docs").unwrap().blog;
        let filters = VectorFilters {
            version: None,
            tags: vec!["tutorials".to_string(), "ai".to_string()],
        };
        let query = vector_query(&corpus, &[1.0], 5, &filters);

        assert!(query.sql.starts_with("SELECT c.id::text AS id"));
        assert!(query
            .sql
            .contains("JOIN docs.tiger_blog_pages p ON p.id = c.page_id"));
        assert!(query.sql.contains("p.tags && $2::text[]"));
        assert_eq!(
            query.binds[1],
            BindValue::TextArray(vec!["tutorials".to_string(), "ai".to_string()])
        );
    }

    #[test]
    fn test_user_input_never_in_sql() {
        let corpus = Corpora::builtin("docs").unwrap().tiger;
        let keywords = "'; DROP TABLE docs.timescale_chunks; --";
        let query = keyword_query(&corpus, keywords, 5).unwrap();

        assert!(!query.sql.contains("DROP"));
        assert_eq!(query.binds[0], BindValue::Text(keywords.to_string()));
    }

    #[test]
    fn test_keyword_query_polarity() {
        let corpus = Corpora::builtin("docs").unwrap().tiger;
        let query = keyword_query(&corpus, "continuous aggregate", 5).unwrap();

        assert!(query.sql.contains(
            "(-(c.content <@> to_bm25query($1, 'docs.timescale_chunks_content_bm25_idx')))::float8 AS score"
        ));
        assert!(query
            .sql
            .contains("ORDER BY c.content <@> to_bm25query($1, 'docs.timescale_chunks_content_bm25_idx')"));
        assert_eq!(query.binds[1], BindValue::Int64(5));
    }

    #[test]
    fn test_keyword_query_requires_index() {
        let corpus = Corpora::builtin("docs").unwrap().postgres;
        assert!(keyword_query(&corpus, "vacuum", 5).is_err());
    }

    #[test]
    fn test_supports_filters() {
        let corpora = Corpora::builtin("docs").unwrap();
        assert!(corpora.postgres.supports_version());
        assert!(!corpora.postgres.supports_tags());
        assert!(!corpora.tiger.supports_version());
        assert!(corpora.blog.supports_tags());
    }

    #[test]
    fn test_table_overrides() {
        let tables = CorpusTables {
            postgres: "postgres_2".to_string(),
            tiger_bm25_index: "chunks_bm25".to_string(),
            ..Default::default()
        };
        let corpora = Corpora::new("docs", &tables).unwrap();

        let query = vector_query(&corpora.postgres, &[1.0], 5, &VectorFilters::default());
        assert!(query.sql.contains("FROM docs.postgres_2 c"));

        let query = keyword_query(&corpora.tiger, "vacuum", 5).unwrap();
        assert!(query.sql.contains("'docs.chunks_bm25'"));

        let bad = CorpusTables {
            blog_pages: "pages; DROP".to_string(),
            ..Default::default()
        };
        assert!(Corpora::new("docs", &bad).is_err());
    }

    #[test]
    fn test_chunk_id_json() {
        assert_eq!(serde_json::to_string(&ChunkId::Int(42)).unwrap(), "42");
        assert_eq!(
            serde_json::to_string(&ChunkId::from("intro-chunk-0")).unwrap(),
            "\"intro-chunk-0\""
        );
        let parsed: ChunkId = serde_json::from_str("\"intro-chunk-0\"").unwrap();
        assert_eq!(parsed.to_string(), "intro-chunk-0");
    }
}
