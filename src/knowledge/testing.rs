//! 테스트 전용 임베딩/코퍼스 픽스처

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;

use super::store::{LocalCorpusStore, NewChunk};

/// 키워드 단어장 기반 결정적 임베딩 (4차원)
const VOCABULARY: [&str; 4] = ["create", "table", "index", "aggregate"];

/// 호출 횟수를 세는 테스트용 임베딩 프로바이더
pub struct CountingEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("provider quota exceeded");
        }

        let lowered = text.to_lowercase();
        Ok(VOCABULARY
            .iter()
            .map(|word| if lowered.contains(word) { 1.0 } else { 0.0 })
            .collect())
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len()
    }

    fn name(&self) -> &str {
        "counting"
    }
}

fn chunk(content: &str, metadata: &str, version: Option<i32>, embedding: [f32; 4]) -> NewChunk {
    NewChunk {
        content: content.to_string(),
        metadata: metadata.to_string(),
        version,
        embedding: Some(embedding.to_vec()),
        ..Default::default()
    }
}

/// postgres / tiger / blog 코퍼스 샘플 데이터 (blog는 문자열 청크 ID)
pub fn seed_docs(store: &LocalCorpusStore) {
    let postgres = [
        chunk(
            "CREATE TABLE — define a new table",
            r#"{"header":"CREATE TABLE","source_url":"https://www.postgresql.org/docs/17/sql-createtable.html"}"#,
            Some(17),
            [1.0, 1.0, 0.0, 0.0],
        ),
        chunk(
            "CREATE INDEX — define a new index",
            r#"{"header":"CREATE INDEX"}"#,
            Some(17),
            [1.0, 0.0, 1.0, 0.0],
        ),
        chunk(
            "ALTER TABLE — change the definition of a table",
            r#"{"header":"ALTER TABLE"}"#,
            Some(17),
            [0.0, 1.0, 0.0, 0.0],
        ),
        chunk(
            "CREATE TABLE — define a new table (PostgreSQL 16)",
            r#"{"header":"CREATE TABLE"}"#,
            Some(16),
            [1.0, 1.0, 0.0, 0.0],
        ),
    ];
    for c in postgres {
        store.add_chunk("postgres", c).unwrap();
    }

    let tiger = [
        chunk(
            "Continuous aggregate refresh policies keep a continuous aggregate up to date.",
            r#"{"title":"Refresh policies"}"#,
            None,
            [0.0, 0.0, 0.0, 1.0],
        ),
        chunk(
            "Create a continuous aggregate with CREATE MATERIALIZED VIEW and timescaledb.continuous.",
            r#"{"title":"Create a continuous aggregate"}"#,
            None,
            [1.0, 0.0, 0.0, 1.0],
        ),
        chunk(
            "Hypertables are PostgreSQL tables that automatically partition data by time.",
            r#"{"title":"Hypertables"}"#,
            None,
            [0.0, 1.0, 0.0, 0.0],
        ),
        NewChunk {
            content: "Compression settings for hypertable chunks.".to_string(),
            metadata: r#"{"title":"Compression"}"#.to_string(),
            ..Default::default()
        },
    ];
    for c in tiger {
        store.add_chunk("tiger", c).unwrap();
    }

    let blog = [
        NewChunk {
            key: Some("building-ai-agents-chunk-0".to_string()),
            tags: vec!["ai".to_string(), "tutorials".to_string()],
            ..chunk(
                "Building AI agents on pgvector and PostgreSQL tables",
                r#"{"title":"AI agents"}"#,
                None,
                [0.0, 1.0, 0.0, 0.0],
            )
        },
        NewChunk {
            key: Some("scaling-time-series-chunk-0".to_string()),
            tags: vec!["engineering".to_string()],
            ..chunk(
                "Scaling time-series tables with hypertables",
                r#"{"title":"Scaling"}"#,
                None,
                [0.0, 1.0, 0.0, 0.0],
            )
        },
    ];
    for c in blog {
        store.add_chunk("blog", c).unwrap();
    }
}
