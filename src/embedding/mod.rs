//! 임베딩 모듈 - OpenAI 호환 API를 통한 텍스트 벡터화
//!
//! 코퍼스는 text-embedding-3-small (1536차원)로 임베딩되어 있으므로
//! 질의도 같은 모델로 임베딩해야 거리 비교가 의미를 가집니다.
//!
//! 실패는 재시도 없이 즉시 호출자에게 전달됩니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::from_env()?;
//! let embedding = embedder.embed("How do I create a hypertable?").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// OpenAI 임베딩 API 엔드포인트
/// source: https://platform.openai.com/docs/api-reference/embeddings
pub const OPENAI_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

/// 기본 임베딩 모델
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI 호환 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedding {
    /// 새 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - API 키
    /// * `url` - 임베딩 엔드포인트 (OpenAI 호환)
    /// * `model` - 모델 이름
    /// * `dimension` - 기대 차원 (응답 길이 검증에 사용)
    pub fn new(api_key: String, url: String, model: String, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: must be greater than 0");
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            url,
            model,
            dimension,
        })
    }

    /// 설정값으로 생성
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match &config.api_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => get_api_key()?,
        };
        Self::new(
            api_key,
            config.url.clone(),
            config.model.clone(),
            config.dimension,
        )
    }

    /// 환경변수에서 API 키를 읽어 기본 모델로 생성
    pub fn from_env() -> Result<Self> {
        Self::from_config(&EmbeddingConfig::default())
    }

    /// 모델 이름
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// 임베딩 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

/// 임베딩 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// API 에러 응답
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default, rename = "type")]
    kind: String,
}

/// 응답 본문에서 임베딩 추출 및 차원 검증
fn parse_embedding(body: &str, dimension: usize) -> Result<Vec<f32>> {
    let response: EmbedResponse =
        serde_json::from_str(body).context("Failed to parse embedding response")?;

    let embedding = response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| anyhow::anyhow!("Embedding response contained no data"))?;

    if embedding.len() != dimension {
        anyhow::bail!(
            "Embedding dimension mismatch: expected {}, got {}",
            dimension,
            embedding.len()
        );
    }

    Ok(embedding)
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            anyhow::bail!("Cannot embed empty text");
        }

        let request = EmbedRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimension,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if status.is_success() {
            return parse_embedding(&body, self.dimension);
        }

        if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
            anyhow::bail!(
                "Embedding API error ({} {}): {}",
                status,
                error.error.kind,
                error.error.message
            );
        }
        anyhow::bail!("Embedding API error ({}): {}", status, body)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (`OPENAI_API_KEY` 환경변수)
pub fn get_api_key() -> Result<String> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => {
            tracing::debug!("Using API key from OPENAI_API_KEY");
            Ok(key)
        }
        _ => anyhow::bail!(
            "API key not found. Set OPENAI_API_KEY environment variable.\n\
             Get your API key at: https://platform.openai.com/api-keys"
        ),
    }
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    std::env::var("OPENAI_API_KEY")
        .map(|key| !key.is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정값으로 임베딩 프로바이더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<OpenAiEmbedding> {
    let embedder = OpenAiEmbedding::from_config(config)?;
    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.model(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_dimension() {
        let result = OpenAiEmbedding::new(
            "fake_key".to_string(),
            OPENAI_EMBED_URL.to_string(),
            DEFAULT_MODEL.to_string(),
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_key_wins() {
        let config = EmbeddingConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let embedder = OpenAiEmbedding::from_config(&config).unwrap();
        assert_eq!(embedder.model(), DEFAULT_MODEL);
        assert_eq!(embedder.dimension(), 1536);
    }

    #[test]
    fn test_parse_embedding() {
        let body = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2,0.3]}],"model":"text-embedding-3-small"}"#;
        assert_eq!(parse_embedding(body, 3).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_parse_embedding_dimension_mismatch() {
        let body = r#"{"data":[{"embedding":[0.1,0.2]}]}"#;
        let err = parse_embedding(body, 3).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_parse_embedding_malformed() {
        assert!(parse_embedding("not json", 3).is_err());
        assert!(parse_embedding(r#"{"data":[]}"#, 3).is_err());
    }

    #[tokio::test]
    async fn test_embed_empty_text_fails_without_request() {
        let embedder = OpenAiEmbedding::new(
            "fake_key".to_string(),
            "http://127.0.0.1:9/unreachable".to_string(),
            DEFAULT_MODEL.to_string(),
            1536,
        )
        .unwrap();
        let err = embedder.embed("   ").await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
