//! Keyword Search - BM25 키워드 검색 서비스
//!
//! score는 클수록 관련도가 높습니다 (벡터 검색 distance와 반대 방향).
//! 설정으로 비활성화되면 facade에 도구 자체가 등록되지 않습니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

use super::corpus::{ChunkId, CorpusConfig};
use super::store::CorpusStore;

/// 키워드 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSearchResult {
    /// 청크 ID (코퍼스에 따라 정수 또는 문자열)
    pub id: ChunkId,
    /// 청크 텍스트
    pub content: String,
    /// 메타데이터 JSON 문자열
    pub metadata: String,
    /// BM25 관련도 (클수록 관련도 높음)
    pub score: f64,
}

/// 키워드 검색 서비스 (코퍼스 하나에 바인딩)
pub struct KeywordSearchService {
    corpus: CorpusConfig,
    store: Arc<dyn CorpusStore>,
}

impl KeywordSearchService {
    pub fn new(corpus: CorpusConfig, store: Arc<dyn CorpusStore>) -> Self {
        Self { corpus, store }
    }

    pub fn corpus(&self) -> &CorpusConfig {
        &self.corpus
    }

    /// 키워드 검색
    ///
    /// # Returns
    /// score 내림차순 결과 (최대 `limit`건)
    pub async fn search(&self, keywords: &str, limit: usize) -> Result<Vec<KeywordSearchResult>> {
        if keywords.trim().is_empty() {
            return Err(RetrievalError::validation("keywords must not be empty"));
        }
        if limit < 1 {
            return Err(RetrievalError::validation("limit must be at least 1"));
        }

        let mut results = self
            .store
            .keyword(&self.corpus, keywords, limit)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Keyword search on corpus '{}' failed: {:#}",
                    self.corpus.name,
                    e
                );
                RetrievalError::Store(format!("{:#}", e))
            })?;

        results.truncate(limit);
        Ok(results)
    }
}
