//! 설정 모듈 - 환경변수 기반 설정
//!
//! 스키마 이름 등 SQL 식별자는 `validate()`에서 한 번 검증되며,
//! 이후 요청 처리 중에는 사용자 입력으로부터 식별자를 만들지 않습니다.

use std::path::{Path, PathBuf};

use crate::embedding::{DEFAULT_MODEL, OPENAI_EMBED_URL};
use crate::error::{Result, RetrievalError};
use crate::knowledge::{Corpora, CorpusTables, EMBEDDING_DIMENSION};

/// 기본 PostgreSQL 버전 필터
pub const DEFAULT_PG_VERSION: i32 = 17;

/// 기본 스키마
pub const DEFAULT_SCHEMA: &str = "docs";

/// 기본 커넥션 풀 크기
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.pg-docs-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pg-docs-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 임베딩 프로바이더 설정
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// 없으면 `OPENAI_API_KEY`에서 읽음
    pub api_key: Option<String>,
    pub url: String,
    pub model: String,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: OPENAI_EMBED_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimension: EMBEDDING_DIMENSION,
        }
    }
}

/// 전체 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL 연결 문자열
    pub database_url: Option<String>,
    /// 로컬 SQLite 코퍼스 (설정 시 PostgreSQL 대신 사용)
    pub local_db: Option<PathBuf>,
    pub max_connections: u32,
    pub embedding: EmbeddingConfig,
    /// 코퍼스 테이블 스키마
    pub schema: String,
    /// 코퍼스 테이블/인덱스 이름
    pub tables: CorpusTables,
    pub skills_dir: PathBuf,
    pub guides_dir: PathBuf,
    /// BM25 키워드 검색 도구 등록 여부
    pub keyword_search: bool,
    pub default_version: i32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = get_data_dir();
        Self {
            database_url: None,
            local_db: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            embedding: EmbeddingConfig::default(),
            schema: DEFAULT_SCHEMA.to_string(),
            tables: CorpusTables::default(),
            skills_dir: data_dir.join("skills"),
            guides_dir: data_dir.join("guides"),
            keyword_search: false,
            default_version: DEFAULT_PG_VERSION,
        }
    }
}

impl Config {
    /// 환경변수에서 설정 로드
    ///
    /// | 변수 | 기본값 |
    /// |---|---|
    /// | `DATABASE_URL` | - |
    /// | `PG_DOCS_LOCAL_DB` | - |
    /// | `PG_DOCS_MAX_CONNECTIONS` | 5 |
    /// | `OPENAI_API_KEY` | - |
    /// | `PG_DOCS_EMBEDDING_MODEL` | text-embedding-3-small |
    /// | `PG_DOCS_EMBEDDING_URL` | OpenAI embeddings |
    /// | `PG_DOCS_SCHEMA` | docs |
    /// | `PG_DOCS_POSTGRES_TABLE` | postgres |
    /// | `PG_DOCS_TIGER_CHUNKS_TABLE` | timescale_chunks |
    /// | `PG_DOCS_TIGER_PAGES_TABLE` | timescale_pages |
    /// | `PG_DOCS_TIGER_BM25_INDEX` | timescale_chunks_content_bm25_idx |
    /// | `PG_DOCS_BLOG_CHUNKS_TABLE` | tiger_blog_chunks |
    /// | `PG_DOCS_BLOG_PAGES_TABLE` | tiger_blog_pages |
    /// | `PG_DOCS_SKILLS_DIR` | ~/.pg-docs-rag/skills |
    /// | `PG_DOCS_GUIDES_DIR` | ~/.pg-docs-rag/guides |
    /// | `PG_DOCS_KEYWORD_SEARCH` | false |
    /// | `PG_DOCS_DEFAULT_VERSION` | 17 |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키 조회 함수로 설정 로드 (테스트용 주입 지점)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.database_url = get("DATABASE_URL");
        config.local_db = get("PG_DOCS_LOCAL_DB").map(PathBuf::from);

        if let Some(value) = get("PG_DOCS_MAX_CONNECTIONS") {
            config.max_connections = parse_number("PG_DOCS_MAX_CONNECTIONS", &value)?;
        }

        config.embedding.api_key = get("OPENAI_API_KEY");
        if let Some(model) = get("PG_DOCS_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(url) = get("PG_DOCS_EMBEDDING_URL") {
            config.embedding.url = url;
        }

        if let Some(schema) = get("PG_DOCS_SCHEMA") {
            config.schema = schema;
        }
        let tables = &mut config.tables;
        for (key, slot) in [
            ("PG_DOCS_POSTGRES_TABLE", &mut tables.postgres),
            ("PG_DOCS_TIGER_CHUNKS_TABLE", &mut tables.tiger_chunks),
            ("PG_DOCS_TIGER_PAGES_TABLE", &mut tables.tiger_pages),
            ("PG_DOCS_TIGER_BM25_INDEX", &mut tables.tiger_bm25_index),
            ("PG_DOCS_BLOG_CHUNKS_TABLE", &mut tables.blog_chunks),
            ("PG_DOCS_BLOG_PAGES_TABLE", &mut tables.blog_pages),
        ] {
            if let Some(value) = get(key) {
                *slot = value.trim().to_string();
            }
        }
        if let Some(dir) = get("PG_DOCS_SKILLS_DIR") {
            config.skills_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("PG_DOCS_GUIDES_DIR") {
            config.guides_dir = PathBuf::from(dir);
        }
        if let Some(value) = get("PG_DOCS_KEYWORD_SEARCH") {
            config.keyword_search = parse_bool("PG_DOCS_KEYWORD_SEARCH", &value)?;
        }
        if let Some(value) = get("PG_DOCS_DEFAULT_VERSION") {
            config.default_version = parse_number("PG_DOCS_DEFAULT_VERSION", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 검증 (시작 시 1회)
    pub fn validate(&self) -> Result<()> {
        self.corpora()?;

        if self.max_connections == 0 {
            return Err(RetrievalError::Config(
                "PG_DOCS_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(RetrievalError::Config(
                "embedding dimension must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// 검증된 코퍼스 정의
    pub fn corpora(&self) -> Result<Corpora> {
        Corpora::new(&self.schema, &self.tables)
    }

    /// 상태 출력용 연결 대상 (비밀번호 제거)
    pub fn redacted_database_url(&self) -> Option<String> {
        self.database_url.as_deref().map(redact_url)
    }

    /// 로컬 코퍼스 경로
    pub fn local_db_path(&self) -> Option<&Path> {
        self.local_db.as_deref()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RetrievalError::Config(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RetrievalError::Config(format!("{} must be a number, got {:?}", key, value)))
}

/// URL의 비밀번호를 `***`로 치환
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.schema, "docs");
        assert_eq!(config.default_version, 17);
        assert!(!config.keyword_search);
        assert!(config.database_url.is_none());
        assert_eq!(config.embedding.dimension, 1536);
        assert!(config.skills_dir.ends_with("skills"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://u:p@localhost/db"),
            ("PG_DOCS_KEYWORD_SEARCH", "true"),
            ("PG_DOCS_DEFAULT_VERSION", "16"),
            ("PG_DOCS_SCHEMA", "docs_v2"),
            ("PG_DOCS_SKILLS_DIR", "/srv/skills"),
        ])
        .unwrap();

        assert!(config.keyword_search);
        assert_eq!(config.default_version, 16);
        assert_eq!(config.schema, "docs_v2");
        assert_eq!(config.skills_dir, PathBuf::from("/srv/skills"));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let err = config_from(&[("PG_DOCS_SCHEMA", "docs; drop")]).unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }

    #[test]
    fn test_table_overrides() {
        let config = config_from(&[
            ("PG_DOCS_POSTGRES_TABLE", "postgres_2"),
            ("PG_DOCS_TIGER_BM25_INDEX", "chunks_bm25_idx"),
            ("PG_DOCS_BLOG_PAGES_TABLE", " blog_pages "),
        ])
        .unwrap();

        assert_eq!(config.tables.postgres, "postgres_2");
        assert_eq!(config.tables.tiger_bm25_index, "chunks_bm25_idx");
        assert_eq!(config.tables.blog_pages, "blog_pages");
        assert_eq!(config.tables.tiger_chunks, "timescale_chunks");

        let corpora = config.corpora().unwrap();
        assert_eq!(corpora.postgres.chunk_table.as_str(), "postgres_2");
        assert_eq!(
            corpora.tiger.bm25_index.as_ref().map(|i| i.as_str()),
            Some("chunks_bm25_idx")
        );
    }

    #[test]
    fn test_invalid_table_rejected() {
        for key in [
            "PG_DOCS_POSTGRES_TABLE",
            "PG_DOCS_TIGER_CHUNKS_TABLE",
            "PG_DOCS_TIGER_PAGES_TABLE",
            "PG_DOCS_TIGER_BM25_INDEX",
            "PG_DOCS_BLOG_CHUNKS_TABLE",
            "PG_DOCS_BLOG_PAGES_TABLE",
        ] {
            let err = config_from(&[(key, "docs.postgres; --")]).unwrap_err();
            assert!(matches!(err, RetrievalError::Config(_)), "{}", key);
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config_from(&[("PG_DOCS_KEYWORD_SEARCH", "maybe")]).is_err());
        assert!(config_from(&[("PG_DOCS_DEFAULT_VERSION", "seventeen")]).is_err());
        assert!(config_from(&[("PG_DOCS_MAX_CONNECTIONS", "0")]).is_err());
    }

    #[test]
    fn test_blank_values_ignored() {
        let config = config_from(&[("PG_DOCS_SCHEMA", "  "), ("DATABASE_URL", "")]).unwrap();
        assert_eq!(config.schema, "docs");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_redacted_database_url() {
        let config = config_from(&[("DATABASE_URL", "postgres://admin:s3cret@db:5432/docs")]).unwrap();
        let redacted = config.redacted_database_url().unwrap();
        assert!(!redacted.contains("s3cret"));
        assert!(redacted.contains("admin"));
        assert!(redacted.contains("db:5432/docs"));
    }
}
