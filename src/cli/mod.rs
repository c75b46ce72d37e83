//! CLI 모듈
//!
//! pg-docs-rag CLI 명령어 정의 및 구현
//!
//! 검색 명령어는 `RetrievalFacade`를 통해 실행되며,
//! 스킬/가이드 명령어는 DB 연결 없이 `ContentStore`만 사용합니다.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{get_data_dir, Config};
use crate::content::{ContentEntry, ContentStore};
use crate::embedding::has_api_key;
use crate::facade::RetrievalFacade;
use crate::knowledge::{LocalCorpusStore, VectorSearchResult};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "pg-docs-rag")]
#[command(version, about = "PostgreSQL / TimescaleDB 문서 검색", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 시맨틱 검색 대상 코퍼스
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CorpusArg {
    /// PostgreSQL 공식 문서
    Postgres,
    /// TimescaleDB / Tiger Data 문서
    Tiger,
    /// Tiger Data 블로그
    Blog,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 시맨틱 검색
    Search {
        /// 검색 프롬프트
        prompt: String,

        /// 검색 대상 코퍼스
        #[arg(short, long, value_enum, default_value = "postgres")]
        corpus: CorpusArg,

        /// PostgreSQL 버전 (postgres 코퍼스 전용)
        #[arg(long)]
        pg_version: Option<i32>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// 태그 필터 (blog 코퍼스 전용, 쉼표 구분)
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// BM25 키워드 검색 (tiger 문서)
    Keyword {
        /// 검색 키워드
        keywords: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// 스킬 목록
    Skills,

    /// 스킬 보기
    Skill {
        /// 스킬 이름
        name: String,

        /// 스킬 디렉토리 내 파일
        #[arg(short, long)]
        path: Option<String>,
    },

    /// 가이드 목록
    Guides,

    /// 가이드 보기
    Guide {
        /// 가이드 이름
        name: String,

        /// 가이드 디렉토리 내 파일
        #[arg(short, long)]
        path: Option<String>,
    },

    /// 도구 목록 (JSON)
    Tools,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Search {
            prompt,
            corpus,
            pg_version,
            limit,
            tags,
        } => cmd_search(&config, &prompt, corpus, pg_version, limit, &tags).await,
        Commands::Keyword { keywords, limit } => cmd_keyword(&config, &keywords, limit).await,
        Commands::Skills => cmd_list(&ContentStore::skills(&config.skills_dir)).await,
        Commands::Skill { name, path } => {
            cmd_view(&ContentStore::skills(&config.skills_dir), &name, path.as_deref()).await
        }
        Commands::Guides => cmd_list(&ContentStore::guides(&config.guides_dir)).await,
        Commands::Guide { name, path } => {
            cmd_view(&ContentStore::guides(&config.guides_dir), &name, path.as_deref()).await
        }
        Commands::Tools => cmd_tools(&config).await,
        Commands::Status => cmd_status(&config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// facade 생성 (API 키, DB 설정 확인)
async fn open_facade(config: &Config) -> Result<RetrievalFacade> {
    if config.embedding.api_key.is_none() && !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export OPENAI_API_KEY=your-api-key\n\n\
             API 키 발급: https://platform.openai.com/api-keys"
        );
    }

    RetrievalFacade::from_config(config)
        .await
        .context("RetrievalFacade 초기화 실패")
}

/// 시맨틱 검색 명령어 (search)
async fn cmd_search(
    config: &Config,
    prompt: &str,
    corpus: CorpusArg,
    pg_version: Option<i32>,
    limit: usize,
    tags: &[String],
) -> Result<()> {
    let facade = open_facade(config).await?;

    println!("[*] 검색 중 ({:?}): \"{}\"", corpus, prompt);

    let response = match corpus {
        CorpusArg::Postgres => facade.search_postgres_docs(prompt, pg_version, limit).await,
        CorpusArg::Tiger => facade.search_tiger_docs(prompt, limit).await,
        CorpusArg::Blog => facade.search_tiger_blog(prompt, tags, limit).await,
    }
    .context("검색 실패")?;

    print_vector_results(&response.results);
    Ok(())
}

/// 키워드 검색 명령어 (keyword)
async fn cmd_keyword(config: &Config, keywords: &str, limit: usize) -> Result<()> {
    if !config.keyword_search {
        bail!(
            "키워드 검색이 비활성화되어 있습니다.\n\
             설정: export PG_DOCS_KEYWORD_SEARCH=true"
        );
    }

    let facade = open_facade(config).await?;

    println!("[*] 키워드 검색 중: \"{}\"", keywords);

    let response = facade
        .keyword_search_tiger_docs(keywords, limit)
        .await
        .context("키워드 검색 실패")?;

    if response.results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", response.results.len());
    for (i, result) in response.results.iter().enumerate() {
        println!("{}. [점수: {:.4}] Chunk #{}", i + 1, result.score, result.id);
        println!("   메타데이터: {}", truncate_text(&result.metadata, 120));
        println!("   내용: {}", truncate_text(&result.content, 200));
        println!();
    }

    Ok(())
}

/// 목록 명령어 (skills, guides)
async fn cmd_list(store: &ContentStore) -> Result<()> {
    let entries = store.list().await.context("목록 조회 실패")?;

    if entries.is_empty() {
        println!("[!] 등록된 {}가 없습니다: {}", store.kind(), store.root().display());
        return Ok(());
    }

    println!("[OK] 등록된 {} ({} 건):\n", store.kind(), entries.len());
    for entry in &entries {
        print_entry(entry);
    }

    Ok(())
}

/// 문서 보기 명령어 (skill, guide)
async fn cmd_view(store: &ContentStore, name: &str, path: Option<&str>) -> Result<()> {
    let document = store
        .document(name, path)
        .await
        .with_context(|| format!("{} '{}' 조회 실패", store.kind(), name))?;

    println!("# {}", document.title);
    println!("> {}", document.description);
    println!();
    println!("{}", document.content);

    Ok(())
}

/// 도구 목록 명령어 (tools)
async fn cmd_tools(config: &Config) -> Result<()> {
    let facade = open_facade(config).await?;
    let tools = facade.tools().await;
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

/// 상태 명령어 (status)
///
/// 시스템 상태를 확인합니다.
async fn cmd_status(config: &Config) -> Result<()> {
    println!("pg-docs-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());

    // API 키 상태
    if config.embedding.api_key.is_some() || has_api_key() {
        println!(
            "[OK] API 키: 설정됨 ({}, {} 차원)",
            config.embedding.model, config.embedding.dimension
        );
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    // 코퍼스 저장소
    match (config.local_db_path(), config.redacted_database_url()) {
        (Some(path), _) => match LocalCorpusStore::open(path).and_then(|s| s.stats()) {
            Ok(stats) => {
                println!("[OK] 로컬 코퍼스: {}", stats.db_path.display());
                println!(
                    "     청크: {} 건 (임베딩 {} 건)",
                    stats.chunk_count, stats.embedded_count
                );
                for (corpus, count) in &stats.corpus_counts {
                    println!("     - {}: {} 건", corpus, count);
                }
            }
            Err(e) => println!("[!] 로컬 코퍼스 열기 실패: {:#}", e),
        },
        (None, Some(url)) => println!("[OK] PostgreSQL: {} (스키마: {})", url, config.schema),
        (None, None) => {
            println!("[!] 코퍼스 저장소: 미설정");
            println!("    설정: export DATABASE_URL=postgres://...");
        }
    }

    println!(
        "[*] 키워드 검색: {}",
        if config.keyword_search { "활성화" } else { "비활성화" }
    );
    println!("[*] 기본 PostgreSQL 버전: {}", config.default_version);

    // 스킬/가이드
    for store in [
        ContentStore::skills(&config.skills_dir),
        ContentStore::guides(&config.guides_dir),
    ] {
        match store.list().await {
            Ok(entries) => println!(
                "[OK] {}: {} 건 ({})",
                store.kind(),
                entries.len(),
                store.root().display()
            ),
            Err(e) => println!("[!] {} 목록 조회 실패: {}", store.kind(), e),
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_vector_results(results: &[VectorSearchResult]) {
    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return;
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());
    for (i, result) in results.iter().enumerate() {
        println!("{}. [거리: {:.4}] Chunk #{}", i + 1, result.distance, result.id);
        println!("   메타데이터: {}", truncate_text(&result.metadata, 120));
        println!("   내용: {}", truncate_text(&result.content, 200));
        println!();
    }
}

fn print_entry(entry: &ContentEntry) {
    let title = entry.title.as_deref().unwrap_or("-");
    println!("  {:<32} {}", entry.name, truncate_text(title, 40));
    println!("        {}", truncate_text(&entry.description, 100));
    println!("        {}", display_path(&entry.location));
    println!();
}

fn display_path(path: &std::path::Path) -> String {
    match dirs::home_dir().and_then(|home| path.strip_prefix(home).ok().map(PathBuf::from)) {
        Some(relative) => format!("~/{}", relative.display()),
        None => path.display().to_string(),
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        let truncated = truncate_text(korean, 5);
        assert_eq!(truncated, "안녕하세요...");
    }

    #[test]
    fn test_parse_search_args() {
        let cli = Cli::try_parse_from([
            "pg-docs-rag",
            "search",
            "pgvector tutorial",
            "--corpus",
            "blog",
            "--tags",
            "ai,tutorials",
            "-l",
            "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Search {
                prompt,
                corpus,
                pg_version,
                limit,
                tags,
            } => {
                assert_eq!(prompt, "pgvector tutorial");
                assert_eq!(corpus, CorpusArg::Blog);
                assert_eq!(pg_version, None);
                assert_eq!(limit, 3);
                assert_eq!(tags, vec!["ai", "tutorials"]);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn test_parse_skill_args() {
        let cli =
            Cli::try_parse_from(["pg-docs-rag", "skill", "design-postgres-tables", "-p", "a.sql"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Skill { ref name, path: Some(ref p) } if name == "design-postgres-tables" && p == "a.sql"
        ));
    }

    #[test]
    fn test_display_path_outside_home() {
        assert_eq!(
            display_path(std::path::Path::new("/srv/skills/a")),
            "/srv/skills/a"
        );
    }
}
