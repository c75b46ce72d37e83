//! Manifest - SKILL.md / GUIDE.md frontmatter 파싱 및 이름 정규화
//!
//! ```text
//! ---
//! name: setup-timescaledb
//! description: Install and configure TimescaleDB
//! title: Setting up TimescaleDB   (선택)
//! ---
//! 본문...
//! ```

use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

/// 스킬 매니페스트 파일 이름
pub const SKILL_MANIFEST: &str = "SKILL.md";

/// 가이드 매니페스트 파일 이름
pub const GUIDE_MANIFEST: &str = "GUIDE.md";

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// 파싱된 매니페스트
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// 선언된 이름 (정규화 전)
    pub name: String,
    pub description: String,
    pub title: Option<String>,
    /// frontmatter를 제외한 본문
    pub body: String,
}

/// frontmatter와 본문 분리
///
/// 첫 줄이 `---`이고 이후 `---` 단독 줄이 있을 때만 frontmatter로 인식합니다.
pub fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix("---\r\n")
        .or_else(|| text.strip_prefix("---\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }

    None
}

/// 매니페스트 파싱 (name, description 필수)
pub fn parse_manifest(text: &str) -> Result<Manifest> {
    let (yaml, body) =
        split_frontmatter(text).ok_or_else(|| anyhow::anyhow!("missing frontmatter block"))?;

    let frontmatter: Frontmatter = if yaml.trim().is_empty() {
        Frontmatter::default()
    } else {
        serde_yaml::from_str(yaml).context("invalid frontmatter YAML")?
    };

    let name = frontmatter
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow::anyhow!("frontmatter is missing 'name'"))?;

    let description = frontmatter
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| anyhow::anyhow!("frontmatter is missing 'description'"))?;

    let title = frontmatter
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    Ok(Manifest {
        name,
        description,
        title,
        body: body.trim_start_matches(['\r', '\n']).to_string(),
    })
}

/// 이미 안전한 형태의 이름인지 (`[a-z0-9_-]+`)
pub fn is_safe_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z0-9_-]+$").expect("name pattern is valid"))
        .is_match(name)
}

/// 이름 정규화
///
/// 소문자 변환, 공백 -> `-`, 허용되지 않는 문자 -> `_`,
/// 연속된 구분자 축약, 앞뒤 구분자 제거.
/// 결과가 비어 있을 수 있으며 호출자가 처리합니다.
pub fn normalize_name(name: &str) -> String {
    static RUNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    let (dashes, underscores) = RUNS.get_or_init(|| {
        (
            Regex::new(r"-{2,}").expect("dash pattern is valid"),
            Regex::new(r"_{2,}").expect("underscore pattern is valid"),
        )
    });

    let mapped: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_whitespace() {
                '-'
            } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let collapsed = dashes.replace_all(&mapped, "-");
    let collapsed = underscores.replace_all(&collapsed, "_");
    collapsed.trim_matches(['-', '_']).to_string()
}
