//! 에러 타입 - 검색/콘텐츠 계층 공통 에러 분류
//!
//! 호출자(facade)는 `is_client_error()`로 호출자 잘못인지 서버 장애인지 구분하고,
//! `public_message()`로 내부 정보가 빠진 메시지를 전달합니다.

use std::path::PathBuf;

use thiserror::Error;

/// 검색/콘텐츠 작업 결과 타입
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// 검색 계층 에러
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// 입력값 오류 (빈 프롬프트, 잘못된 limit 등)
    #[error("invalid input: {0}")]
    Validation(String),

    /// 등록되지 않은 이름
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// 이름은 유효하지만 하위 리소스를 읽을 수 없음
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 임베딩 프로바이더 호출 실패
    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// 코퍼스 저장소 쿼리 실패
    #[error("corpus store error: {0}")]
    Store(String),

    /// 설정 오류 (시작 시점에만 발생)
    #[error("configuration error: {0}")]
    Config(String),

    /// 문서 디렉토리 스캔 작업 실패
    #[error("document discovery failed: {0}")]
    Discovery(String),
}

impl RetrievalError {
    /// Validation 에러 생성
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// NotFound 에러 생성
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// 호출자 입력에 원인이 있는 에러인지 여부
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound { .. })
    }

    /// 호출자에게 노출 가능한 메시지
    ///
    /// 프로바이더/저장소 에러의 상세 내용은 서버 로그에만 남깁니다.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(_) | Self::NotFound { .. } => self.to_string(),
            Self::Read { .. } => "the requested resource could not be read".to_string(),
            Self::Embedding(_) => "failed to generate an embedding for the query".to_string(),
            Self::Store(_) => "the documentation database query failed".to_string(),
            Self::Config(_) => "the server is misconfigured".to_string(),
            Self::Discovery(_) => "document discovery failed".to_string(),
        }
    }
}
