//! Vector Search - 시맨틱 검색 서비스 및 거리 함수
//!
//! 프롬프트를 임베딩한 뒤 코퍼스에서 거리 오름차순으로 가장 가까운 청크를 찾습니다.
//! 거리 값은 작을수록 관련도가 높습니다 (키워드 검색 score와 반대 방향).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::{Result, RetrievalError};

use super::corpus::{ChunkId, CorpusConfig, DistanceMetric};
use super::store::CorpusStore;

/// 코퍼스 임베딩 차원 (text-embedding-3-small)
/// source: https://platform.openai.com/docs/guides/embeddings
pub const EMBEDDING_DIMENSION: usize = 1536;

/// 기본 결과 개수
pub const DEFAULT_LIMIT: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// 벡터 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    /// 청크 ID (코퍼스에 따라 정수 또는 문자열)
    pub id: ChunkId,
    /// 청크 텍스트
    pub content: String,
    /// 메타데이터 JSON 문자열 (파싱하지 않고 그대로 전달)
    pub metadata: String,
    /// 거리 (작을수록 관련도 높음)
    pub distance: f64,
}

/// 벡터 검색 필터
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorFilters {
    /// 문서 버전 일치
    pub version: Option<i32>,
    /// 태그 중 하나 이상 일치 (비어 있으면 필터 없음)
    pub tags: Vec<String>,
}

impl VectorFilters {
    /// 코퍼스가 지원하지 않는 필터 제거
    pub fn applicable_to(&self, corpus: &CorpusConfig) -> Self {
        let version = if corpus.supports_version() {
            self.version
        } else {
            if self.version.is_some() {
                tracing::debug!(
                    "corpus '{}' is unversioned, ignoring version filter",
                    corpus.name
                );
            }
            None
        };

        let tags = if corpus.supports_tags() {
            self.tags
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        Self { version, tags }
    }
}

// ============================================================================
// VectorSearchService
// ============================================================================

/// 시맨틱 검색 서비스 (코퍼스 하나에 바인딩)
pub struct VectorSearchService {
    corpus: CorpusConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn CorpusStore>,
}

impl VectorSearchService {
    pub fn new(
        corpus: CorpusConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn CorpusStore>,
    ) -> Self {
        Self {
            corpus,
            embedder,
            store,
        }
    }

    pub fn corpus(&self) -> &CorpusConfig {
        &self.corpus
    }

    /// 시맨틱 검색
    ///
    /// # Arguments
    /// * `prompt` - 자연어 질의 (비어 있으면 임베딩 호출 없이 실패)
    /// * `limit` - 최대 결과 수 (1 이상)
    /// * `filters` - version / tags 필터
    ///
    /// # Returns
    /// 거리 오름차순 결과 (최대 `limit`건)
    pub async fn search(
        &self,
        prompt: &str,
        limit: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<VectorSearchResult>> {
        if prompt.trim().is_empty() {
            return Err(RetrievalError::validation("prompt must not be empty"));
        }
        if limit < 1 {
            return Err(RetrievalError::validation("limit must be at least 1"));
        }

        let embedding = self.embedder.embed(prompt).await.map_err(|e| {
            tracing::error!(
                "Embedding provider '{}' failed: {:#}",
                self.embedder.name(),
                e
            );
            RetrievalError::Embedding(format!("{:#}", e))
        })?;

        let filters = filters.applicable_to(&self.corpus);

        let mut results = self
            .store
            .nearest(&self.corpus, &embedding, limit, &filters)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Vector search on corpus '{}' failed: {:#}",
                    self.corpus.name,
                    e
                );
                RetrievalError::Store(format!("{:#}", e))
            })?;

        results.truncate(limit);
        tracing::debug!(
            "vector search on '{}' returned {} result(s)",
            self.corpus.name,
            results.len()
        );

        Ok(results)
    }
}

// ============================================================================
// Distance Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// pgvector와 동일한 규칙의 거리 계산
///
/// 길이가 다르면 `None`을 반환합니다.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let value = match metric {
        DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b) as f64,
        DistanceMetric::InnerProduct => {
            -a.iter()
                .zip(b.iter())
                .map(|(x, y)| (*x as f64) * (*y as f64))
                .sum::<f64>()
        }
        DistanceMetric::L2 => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let d = (*x as f64) - (*y as f64);
                d * d
            })
            .sum::<f64>()
            .sqrt(),
    };

    Some(value)
}

// ============================================================================
// Tests
// ============================================================================
