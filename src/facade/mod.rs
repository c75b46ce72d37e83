//! Facade 모듈 - 검색/콘텐츠 서비스를 도구 호출 형태로 노출
//!
//! 도구 이름 + JSON 인자 -> JSON 결과.
//! 인자 스키마 검증 후 서비스에 위임하고, 실패는 `code` + `message`로 변환합니다.
//! 저장소/프로바이더 에러의 상세 내용은 로그에만 남고 호출자에게는 노출되지 않습니다.
//!
//! | 도구 | 서비스 |
//! |---|---|
//! | `semantic_search_postgres_docs` | VectorSearchService (postgres) |
//! | `semantic_search_tiger_docs` | VectorSearchService (tiger) |
//! | `semantic_search_tiger_blog` | VectorSearchService (blog) |
//! | `keyword_search_tiger_docs` | KeywordSearchService (설정으로 활성화 시에만) |
//! | `view_skill` | ContentStore (skills) |
//! | `get_guide` | ContentStore (guides) |

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Config;
use crate::content::{ContentDocument, ContentStore};
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::knowledge::{
    Corpora, CorpusStore, KeywordSearchResult, KeywordSearchService, LocalCorpusStore,
    PgCorpusStore, VectorFilters, VectorSearchResult, VectorSearchService, DEFAULT_LIMIT,
};

pub const SEMANTIC_SEARCH_POSTGRES_DOCS: &str = "semantic_search_postgres_docs";
pub const SEMANTIC_SEARCH_TIGER_DOCS: &str = "semantic_search_tiger_docs";
pub const SEMANTIC_SEARCH_TIGER_BLOG: &str = "semantic_search_tiger_blog";
pub const KEYWORD_SEARCH_TIGER_DOCS: &str = "keyword_search_tiger_docs";
pub const VIEW_SKILL: &str = "view_skill";
pub const GET_GUIDE: &str = "get_guide";

// ============================================================================
// Errors
// ============================================================================

/// 호출자에게 전달되는 에러 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidParams,
    NotFound,
    ReadError,
    UnknownTool,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::NotFound => "not_found",
            Self::ReadError => "read_error",
            Self::UnknownTool => "unknown_tool",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 도구 호출 에러 (호출자 노출용)
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{code}: {message}")]
pub struct FacadeError {
    pub code: ErrorCode,
    pub message: String,
}

impl FacadeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }
}

impl From<RetrievalError> for FacadeError {
    fn from(err: RetrievalError) -> Self {
        let code = match &err {
            RetrievalError::Validation(_) => ErrorCode::InvalidParams,
            RetrievalError::NotFound { .. } => ErrorCode::NotFound,
            RetrievalError::Read { .. } => ErrorCode::ReadError,
            RetrievalError::Embedding(_)
            | RetrievalError::Store(_)
            | RetrievalError::Config(_)
            | RetrievalError::Discovery(_) => ErrorCode::Internal,
        };
        Self::new(code, err.public_message())
    }
}

pub type FacadeResult<T> = std::result::Result<T, FacadeError>;

// ============================================================================
// Tool Arguments / Responses
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PostgresArgs {
    prompt: String,
    #[serde(default)]
    version: Option<i32>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TigerArgs {
    prompt: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlogArgs {
    prompt: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeywordArgs {
    keywords: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContentArgs {
    name: String,
    #[serde(default)]
    path: Option<String>,
}

/// 검색 도구 응답
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse<T> {
    pub results: Vec<T>,
}

/// 도구 목록 항목
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: String,
    pub input_schema: Value,
}

// ============================================================================
// RetrievalFacade
// ============================================================================

/// 검색/콘텐츠 도구 facade
pub struct RetrievalFacade {
    postgres: VectorSearchService,
    tiger: VectorSearchService,
    blog: VectorSearchService,
    keyword: Option<KeywordSearchService>,
    skills: ContentStore,
    guides: ContentStore,
    default_version: i32,
    store_name: String,
}

impl RetrievalFacade {
    /// 구성 요소로 생성
    ///
    /// `keyword_search == false`이면 키워드 검색 도구는 등록되지 않습니다.
    pub fn new(
        corpora: Corpora,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn CorpusStore>,
        skills: ContentStore,
        guides: ContentStore,
        keyword_search: bool,
        default_version: i32,
    ) -> Self {
        let keyword = keyword_search
            .then(|| KeywordSearchService::new(corpora.tiger.clone(), Arc::clone(&store)));

        Self {
            postgres: VectorSearchService::new(
                corpora.postgres,
                Arc::clone(&embedder),
                Arc::clone(&store),
            ),
            tiger: VectorSearchService::new(corpora.tiger, Arc::clone(&embedder), Arc::clone(&store)),
            blog: VectorSearchService::new(corpora.blog, embedder, Arc::clone(&store)),
            keyword,
            skills,
            guides,
            default_version,
            store_name: store.name().to_string(),
        }
    }

    /// 설정으로 생성 (로컬 DB 우선, 없으면 PostgreSQL 연결)
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let corpora = config.corpora()?;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(create_embedder(&config.embedding)?);

        let store: Arc<dyn CorpusStore> = match (&config.local_db, &config.database_url) {
            (Some(path), _) => {
                tracing::info!("Using local corpus database {:?}", path);
                Arc::new(LocalCorpusStore::open(path)?)
            }
            (None, Some(url)) => Arc::new(PgCorpusStore::connect(url, config.max_connections).await?),
            (None, None) => anyhow::bail!(RetrievalError::Config(
                "set DATABASE_URL or PG_DOCS_LOCAL_DB".to_string()
            )),
        };

        if config.keyword_search {
            tracing::info!("Keyword search enabled for corpus '{}'", corpora.tiger.name);
        }

        Ok(Self::new(
            corpora,
            embedder,
            store,
            ContentStore::skills(&config.skills_dir),
            ContentStore::guides(&config.guides_dir),
            config.keyword_search,
            config.default_version,
        ))
    }

    pub fn skills(&self) -> &ContentStore {
        &self.skills
    }

    pub fn guides(&self) -> &ContentStore {
        &self.guides
    }

    pub fn keyword_search_enabled(&self) -> bool {
        self.keyword.is_some()
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    // ------------------------------------------------------------------------
    // Tool Catalogue
    // ------------------------------------------------------------------------

    /// 등록된 도구 이름
    pub fn tool_names(&self) -> Vec<&'static str> {
        let mut names = vec![
            SEMANTIC_SEARCH_POSTGRES_DOCS,
            SEMANTIC_SEARCH_TIGER_DOCS,
            SEMANTIC_SEARCH_TIGER_BLOG,
        ];
        if self.keyword.is_some() {
            names.push(KEYWORD_SEARCH_TIGER_DOCS);
        }
        names.extend([VIEW_SKILL, GET_GUIDE]);
        names
    }

    /// 도구 목록 (입력 스키마 포함)
    ///
    /// 콘텐츠 도구 설명에는 현재 등록된 이름이 포함됩니다.
    pub async fn tools(&self) -> Vec<ToolSpec> {
        let mut tools = vec![
            ToolSpec {
                name: SEMANTIC_SEARCH_POSTGRES_DOCS,
                description: format!(
                    "Semantic search over the PostgreSQL manual. Results are ordered by distance \
                     (lower is more relevant). Defaults to PostgreSQL {}.",
                    self.default_version
                ),
                input_schema: vector_schema(true, false),
            },
            ToolSpec {
                name: SEMANTIC_SEARCH_TIGER_DOCS,
                description: "Semantic search over the TimescaleDB / Tiger Data documentation. \
                              Results are ordered by distance (lower is more relevant)."
                    .to_string(),
                input_schema: vector_schema(false, false),
            },
            ToolSpec {
                name: SEMANTIC_SEARCH_TIGER_BLOG,
                description: "Semantic search over the Tiger Data blog, optionally restricted \
                              to posts carrying any of the given tags."
                    .to_string(),
                input_schema: vector_schema(false, true),
            },
        ];

        if self.keyword.is_some() {
            tools.push(ToolSpec {
                name: KEYWORD_SEARCH_TIGER_DOCS,
                description: "BM25 keyword search over the TimescaleDB / Tiger Data \
                              documentation. Results are ordered by score (higher is more \
                              relevant)."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "keywords": { "type": "string", "minLength": 1 },
                        "limit": { "type": "integer", "minimum": 1, "default": DEFAULT_LIMIT }
                    },
                    "required": ["keywords"],
                    "additionalProperties": false
                }),
            });
        }

        tools.push(ToolSpec {
            name: VIEW_SKILL,
            description: content_description(
                "View a skill: step-by-step instructions for a PostgreSQL or TimescaleDB task.",
                &self.skills,
            )
            .await,
            input_schema: content_schema(),
        });
        tools.push(ToolSpec {
            name: GET_GUIDE,
            description: content_description(
                "Get a guide: long-form reference material.",
                &self.guides,
            )
            .await,
            input_schema: content_schema(),
        });

        tools
    }

    /// 이름으로 도구 호출
    ///
    /// 등록되지 않은 도구(비활성화된 키워드 검색 포함)는 `unknown_tool`로 실패합니다.
    pub async fn call(&self, name: &str, args: Value) -> FacadeResult<Value> {
        tracing::debug!("tool call: {}", name);

        let outcome = match name {
            SEMANTIC_SEARCH_POSTGRES_DOCS => {
                let args: PostgresArgs = parse_args(args)?;
                let limit = checked_limit(args.limit)?;
                to_json(
                    self.search_postgres_docs(&args.prompt, args.version, limit)
                        .await,
                )
            }
            SEMANTIC_SEARCH_TIGER_DOCS => {
                let args: TigerArgs = parse_args(args)?;
                let limit = checked_limit(args.limit)?;
                to_json(self.search_tiger_docs(&args.prompt, limit).await)
            }
            SEMANTIC_SEARCH_TIGER_BLOG => {
                let args: BlogArgs = parse_args(args)?;
                let limit = checked_limit(args.limit)?;
                let tags = args.tags.unwrap_or_default();
                to_json(self.search_tiger_blog(&args.prompt, &tags, limit).await)
            }
            KEYWORD_SEARCH_TIGER_DOCS if self.keyword.is_some() => {
                let args: KeywordArgs = parse_args(args)?;
                let limit = checked_limit(args.limit)?;
                to_json(self.keyword_search_tiger_docs(&args.keywords, limit).await)
            }
            VIEW_SKILL => {
                let args: ContentArgs = parse_args(args)?;
                to_json(self.view_skill(&args.name, args.path.as_deref()).await)
            }
            GET_GUIDE => {
                let args: ContentArgs = parse_args(args)?;
                to_json(self.get_guide(&args.name, args.path.as_deref()).await)
            }
            other => Err(FacadeError::new(
                ErrorCode::UnknownTool,
                format!("unknown tool '{}'", other),
            )),
        };

        if let Err(err) = &outcome {
            tracing::debug!("tool '{}' returned {}", name, err);
        }
        outcome
    }

    // ------------------------------------------------------------------------
    // Typed Operations
    // ------------------------------------------------------------------------

    /// PostgreSQL 문서 시맨틱 검색 (version 미지정 시 기본 버전)
    pub async fn search_postgres_docs(
        &self,
        prompt: &str,
        version: Option<i32>,
        limit: usize,
    ) -> FacadeResult<SearchResponse<VectorSearchResult>> {
        let filters = VectorFilters {
            version: Some(version.unwrap_or(self.default_version)),
            tags: Vec::new(),
        };
        let results = self
            .postgres
            .search(prompt, limit, &filters)
            .await
            .map_err(|e| map_error(SEMANTIC_SEARCH_POSTGRES_DOCS, e))?;
        Ok(SearchResponse { results })
    }

    /// Tiger 문서 시맨틱 검색
    pub async fn search_tiger_docs(
        &self,
        prompt: &str,
        limit: usize,
    ) -> FacadeResult<SearchResponse<VectorSearchResult>> {
        let results = self
            .tiger
            .search(prompt, limit, &VectorFilters::default())
            .await
            .map_err(|e| map_error(SEMANTIC_SEARCH_TIGER_DOCS, e))?;
        Ok(SearchResponse { results })
    }

    /// Tiger 블로그 시맨틱 검색 (tags 중 하나 이상 일치)
    pub async fn search_tiger_blog(
        &self,
        prompt: &str,
        tags: &[String],
        limit: usize,
    ) -> FacadeResult<SearchResponse<VectorSearchResult>> {
        let filters = VectorFilters {
            version: None,
            tags: tags.to_vec(),
        };
        let results = self
            .blog
            .search(prompt, limit, &filters)
            .await
            .map_err(|e| map_error(SEMANTIC_SEARCH_TIGER_BLOG, e))?;
        Ok(SearchResponse { results })
    }

    /// Tiger 문서 키워드 검색
    pub async fn keyword_search_tiger_docs(
        &self,
        keywords: &str,
        limit: usize,
    ) -> FacadeResult<SearchResponse<KeywordSearchResult>> {
        let service = self.keyword.as_ref().ok_or_else(|| {
            FacadeError::new(
                ErrorCode::UnknownTool,
                format!("unknown tool '{}'", KEYWORD_SEARCH_TIGER_DOCS),
            )
        })?;
        let results = service
            .search(keywords, limit)
            .await
            .map_err(|e| map_error(KEYWORD_SEARCH_TIGER_DOCS, e))?;
        Ok(SearchResponse { results })
    }

    pub async fn view_skill(&self, name: &str, path: Option<&str>) -> FacadeResult<ContentDocument> {
        self.skills
            .document(name, path)
            .await
            .map_err(|e| map_error(VIEW_SKILL, e))
    }

    pub async fn get_guide(&self, name: &str, path: Option<&str>) -> FacadeResult<ContentDocument> {
        self.guides
            .document(name, path)
            .await
            .map_err(|e| map_error(GET_GUIDE, e))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 서비스 에러 -> 호출자 에러 (서버 장애는 상세 내용을 로그에 기록)
fn map_error(tool: &str, err: RetrievalError) -> FacadeError {
    if err.is_client_error() {
        tracing::debug!("tool '{}' rejected request: {}", tool, err);
    } else {
        tracing::error!("tool '{}' failed: {:?}", tool, err);
    }
    FacadeError::from(err)
}

fn parse_args<T: DeserializeOwned>(args: Value) -> FacadeResult<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| FacadeError::invalid_params(format!("invalid arguments: {}", e)))
}

fn checked_limit(limit: Option<i64>) -> FacadeResult<usize> {
    match limit {
        None => Ok(DEFAULT_LIMIT),
        Some(n) if n >= 1 => usize::try_from(n)
            .map_err(|_| FacadeError::invalid_params("limit is out of range")),
        Some(_) => Err(FacadeError::invalid_params("limit must be at least 1")),
    }
}

fn to_json<T: Serialize>(outcome: FacadeResult<T>) -> FacadeResult<Value> {
    let value = outcome?;
    serde_json::to_value(value).map_err(|e| {
        tracing::error!("Failed to serialize tool result: {}", e);
        FacadeError::new(ErrorCode::Internal, "failed to encode the result")
    })
}

fn vector_schema(with_version: bool, with_tags: bool) -> Value {
    let mut properties = json!({
        "prompt": { "type": "string", "minLength": 1 },
        "limit": { "type": "integer", "minimum": 1, "default": DEFAULT_LIMIT }
    });
    if with_version {
        properties["version"] = json!({ "type": "integer", "description": "PostgreSQL major version" });
    }
    if with_tags {
        properties["tags"] = json!({ "type": "array", "items": { "type": "string" } });
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": ["prompt"],
        "additionalProperties": false
    })
}

fn content_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "minLength": 1 },
            "path": { "type": "string", "description": "file inside the document directory" }
        },
        "required": ["name"],
        "additionalProperties": false
    })
}

async fn content_description(summary: &str, store: &ContentStore) -> String {
    match store.names().await {
        Ok(names) if !names.is_empty() => format!("{} Available: {}.", summary, names.join(", ")),
        Ok(_) => summary.to_string(),
        Err(e) => {
            tracing::warn!("Failed to list {}s: {}", store.kind(), e);
            summary.to_string()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
