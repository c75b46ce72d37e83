//! Content 모듈 - 스킬/가이드 문서 저장소
//!
//! 루트 디렉토리의 하위 디렉토리 하나가 문서 하나입니다.
//!
//! ```text
//! skills/
//!   design-postgres-tables/
//!     SKILL.md        <- frontmatter(name, description) + 본문
//!     examples.sql    <- 하위 리소스 (content(name, "examples.sql"))
//! ```
//!
//! - 레지스트리는 첫 사용 시 한 번 스캔되고 이후 불변입니다.
//! - 본문은 처음 읽을 때 캐시되며 강제 리로드 전까지 유지됩니다.
//! - 리로드는 레지스트리와 캐시를 `Arc` 스냅샷 교체로 한 번에 바꿉니다.
//! - 동시에 요청된 리로드는 진행 중인 스캔 하나를 공유합니다.

mod manifest;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{Result, RetrievalError};

pub use manifest::{
    is_safe_name, normalize_name, parse_manifest, split_frontmatter, Manifest, GUIDE_MANIFEST,
    SKILL_MANIFEST,
};

// ============================================================================
// Types
// ============================================================================

/// 등록된 문서 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentEntry {
    /// 등록 이름 (정규화 후)
    pub name: String,
    pub title: Option<String>,
    pub description: String,
    /// 문서 디렉토리
    pub location: PathBuf,
}

/// 호출자 응답용 문서
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentDocument {
    pub name: String,
    pub title: String,
    pub description: String,
    pub content: String,
}

/// 레지스트리 스냅샷 (메타데이터 + 본문 캐시)
#[derive(Debug)]
pub struct Registry {
    entries: HashMap<String, ContentEntry>,
    cache: RwLock<HashMap<(String, String), Arc<str>>>,
    loaded_at: DateTime<Utc>,
}

impl Registry {
    fn new(entries: HashMap<String, ContentEntry>) -> Self {
        Self {
            entries,
            cache: RwLock::new(HashMap::new()),
            loaded_at: Utc::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ContentEntry> {
        self.entries.get(name)
    }

    /// 이름 정렬 목록
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// 이름 정렬 엔트리 목록
    pub fn list(&self) -> Vec<ContentEntry> {
        let mut entries: Vec<ContentEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    fn cached(&self, name: &str, sub_path: &str) -> Option<Arc<str>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(name.to_string(), sub_path.to_string()))
            .cloned()
    }

    /// 캐시에 저장 (먼저 저장된 값이 있으면 그 값을 반환)
    fn store(&self, name: &str, sub_path: &str, text: String) -> Arc<str> {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((name.to_string(), sub_path.to_string()))
            .or_insert_with(|| Arc::from(text))
            .clone()
    }
}

type PendingDiscovery = Shared<BoxFuture<'static, std::result::Result<Arc<Registry>, String>>>;

// ============================================================================
// ContentStore
// ============================================================================

/// 스킬/가이드 문서 저장소
pub struct ContentStore {
    /// 로그/에러용 종류 이름 ("skill", "guide")
    kind: &'static str,
    root: PathBuf,
    manifest: &'static str,
    current: Arc<RwLock<Option<Arc<Registry>>>>,
    inflight: Mutex<Option<PendingDiscovery>>,
}

impl ContentStore {
    /// 새 저장소 (스캔은 첫 사용 시)
    pub fn new(kind: &'static str, root: impl Into<PathBuf>, manifest: &'static str) -> Self {
        Self {
            kind,
            root: root.into(),
            manifest,
            current: Arc::new(RwLock::new(None)),
            inflight: Mutex::new(None),
        }
    }

    /// 스킬 저장소 (`<root>/<dir>/SKILL.md`)
    pub fn skills(root: impl Into<PathBuf>) -> Self {
        Self::new("skill", root, SKILL_MANIFEST)
    }

    /// 가이드 저장소 (`<root>/<dir>/GUIDE.md`)
    pub fn guides(root: impl Into<PathBuf>) -> Self {
        Self::new("guide", root, GUIDE_MANIFEST)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 루트 디렉토리 스캔 (레지스트리를 교체하지 않음)
    pub fn discover(&self) -> Registry {
        discover(&self.root, self.manifest, self.kind)
    }

    /// 현재 스냅샷
    fn snapshot(&self) -> Option<Arc<Registry>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 레지스트리 로드/리로드
    ///
    /// `force == false`이고 이미 로드되어 있으면 현재 레지스트리를 반환합니다.
    /// 진행 중인 스캔이 있으면 새로 시작하지 않고 그 결과를 함께 기다립니다.
    pub async fn reload(&self, force: bool) -> Result<Arc<Registry>> {
        if !force {
            if let Some(current) = self.snapshot() {
                return Ok(current);
            }
        }

        let pending = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.start_discovery();
                    *inflight = Some(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.clone().await;

        {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if inflight
                .as_ref()
                .is_some_and(|current| current.ptr_eq(&pending))
            {
                *inflight = None;
            }
        }

        outcome.map_err(RetrievalError::Discovery)
    }

    /// 백그라운드 스캔 시작 (완료 시 스냅샷 교체)
    fn start_discovery(&self) -> PendingDiscovery {
        let root = self.root.clone();
        let manifest = self.manifest;
        let kind = self.kind;
        let slot = Arc::clone(&self.current);

        async move {
            let registry = tokio::task::spawn_blocking(move || discover(&root, manifest, kind))
                .await
                .map_err(|e| format!("{} discovery task failed: {}", kind, e))?;

            let registry = Arc::new(registry);
            *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&registry));
            Ok::<_, String>(registry)
        }
        .boxed()
        .shared()
    }

    /// 이름으로 메타데이터 조회
    pub async fn get(&self, name: &str) -> Result<ContentEntry> {
        let registry = self.reload(false).await?;
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| RetrievalError::not_found(self.kind, name))
    }

    /// 등록된 문서 목록 (이름 정렬)
    pub async fn list(&self) -> Result<Vec<ContentEntry>> {
        Ok(self.reload(false).await?.list())
    }

    /// 등록된 이름 목록 (이름 정렬)
    pub async fn names(&self) -> Result<Vec<String>> {
        Ok(self.reload(false).await?.names())
    }

    /// 문서 본문 또는 하위 리소스 읽기
    ///
    /// # Arguments
    /// * `name` - 등록 이름
    /// * `sub_path` - 문서 디렉토리 기준 상대 경로 (없으면 매니페스트 본문)
    ///
    /// 매니페스트 본문은 frontmatter를 제외하고, 하위 리소스는 원문 그대로 반환합니다.
    pub async fn content(&self, name: &str, sub_path: Option<&str>) -> Result<String> {
        let registry = self.reload(false).await?;
        let entry = registry
            .get(name)
            .ok_or_else(|| RetrievalError::not_found(self.kind, name))?;

        let sub_path = sub_path
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(self.manifest);
        let sub_path = normalize_sub_path(sub_path)?;
        let sub_path = sub_path.as_str();

        if let Some(text) = registry.cached(name, sub_path) {
            return Ok(text.to_string());
        }

        let path = entry.location.join(sub_path);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| RetrievalError::Read {
                path: path.clone(),
                source,
            })?;

        let text = if sub_path == self.manifest {
            match split_frontmatter(&raw) {
                Some((_, body)) => body.trim_start_matches(['\r', '\n']).to_string(),
                None => raw,
            }
        } else {
            raw
        };

        tracing::debug!("Cached {} '{}' ({}, {} bytes)", self.kind, name, sub_path, text.len());
        Ok(registry.store(name, sub_path, text).to_string())
    }

    /// 호출자 응답용 문서 조회
    pub async fn document(&self, name: &str, sub_path: Option<&str>) -> Result<ContentDocument> {
        let entry = self.get(name).await?;
        let content = self.content(name, sub_path).await?;

        Ok(ContentDocument {
            title: entry.title.clone().unwrap_or_else(|| entry.name.clone()),
            name: entry.name,
            description: entry.description,
            content,
        })
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// 루트 디렉토리 스캔
///
/// 개별 문서 실패는 경고 후 건너뛰며 스캔 자체는 항상 완료됩니다.
fn discover(root: &Path, manifest: &str, kind: &str) -> Registry {
    let mut entries: HashMap<String, ContentEntry> = HashMap::new();

    if !root.is_dir() {
        tracing::warn!("{} directory {:?} does not exist", kind, root);
        return Registry::new(entries);
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for dir_entry in walker {
        let dir_entry = match dir_entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read entry in {:?}: {}", root, e);
                continue;
            }
        };

        let location = dir_entry.path();
        if !location.is_dir() {
            continue;
        }

        let manifest_path = location.join(manifest);
        let text = match std::fs::read_to_string(&manifest_path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Skipping {} at {:?}: {}", kind, manifest_path, e);
                continue;
            }
        };

        let parsed = match parse_manifest(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Skipping {} at {:?}: {:#}", kind, manifest_path, e);
                continue;
            }
        };

        let name = if is_safe_name(&parsed.name) {
            parsed.name
        } else {
            let normalized = normalize_name(&parsed.name);
            if normalized.is_empty() {
                tracing::warn!(
                    "Skipping {} at {:?}: name {:?} has no usable characters",
                    kind,
                    manifest_path,
                    parsed.name
                );
                continue;
            }
            tracing::warn!(
                "{} name {:?} normalized to {:?} ({:?})",
                kind,
                parsed.name,
                normalized,
                manifest_path
            );
            normalized
        };

        if let Some(existing) = entries.get(&name) {
            tracing::warn!(
                "Duplicate {} name '{}' at {:?}, keeping {:?}",
                kind,
                name,
                location,
                existing.location
            );
            continue;
        }

        tracing::debug!("Registered {} '{}' from {:?}", kind, name, location);
        entries.insert(
            name.clone(),
            ContentEntry {
                name,
                title: parsed.title,
                description: parsed.description,
                location: location.to_path_buf(),
            },
        );
    }

    if entries.is_empty() {
        tracing::warn!("No {}s found in {:?}", kind, root);
    } else {
        tracing::info!("Loaded {} {}(s) from {:?}", entries.len(), kind, root);
    }

    Registry::new(entries)
}

/// 하위 경로 검증 및 정규화 (절대 경로, `..` 금지)
///
/// `./SKILL.md`, `a//b.sql` 등은 `SKILL.md`, `a/b.sql`로 정규화되어
/// 캐시 키와 매니페스트 판별에 같은 형태로 쓰입니다.
fn normalize_sub_path(sub_path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for component in Path::new(sub_path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(outside_document(sub_path));
            }
        }
    }

    if parts.is_empty() {
        return Err(outside_document(sub_path));
    }
    Ok(parts.join("/"))
}

fn outside_document(sub_path: &str) -> RetrievalError {
    RetrievalError::validation(format!(
        "path {:?} must be relative and stay inside the document directory",
        sub_path
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_skill(root: &Path, dir: &str, name: &str, body: &str) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(
            path.join(SKILL_MANIFEST),
            format!("---\nname: {}\ndescription: About {}\n---\n{}", name, name, body),
        )
        .unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_skill(root, "a-tables", "design-postgres-tables", "# Tables\nUse BIGINT keys.");
        write_skill(root, "b-hyper", "setup-hypertables", "# Hypertables");
        write_skill(root, "c-display", "My Skill", "display name body");
        dir
    }

    #[tokio::test]
    async fn test_discover_registers_valid_documents() {
        let dir = fixture();
        let root = dir.path();

        // 매니페스트 없음 / 잘못된 frontmatter / 이름 중복 / 일반 파일
        fs::create_dir_all(root.join("d-empty")).unwrap();
        fs::create_dir_all(root.join("e-broken")).unwrap();
        fs::write(root.join("e-broken").join(SKILL_MANIFEST), "no frontmatter").unwrap();
        write_skill(root, "f-dup", "setup-hypertables", "second copy");
        fs::write(root.join("README.md"), "not a skill").unwrap();

        let store = ContentStore::skills(root);
        let registry = store.reload(false).await.unwrap();

        assert_eq!(
            registry.names(),
            vec!["design-postgres-tables", "my-skill", "setup-hypertables"]
        );
        assert_eq!(
            registry.get("setup-hypertables").unwrap().location,
            root.join("b-hyper")
        );
    }

    #[tokio::test]
    async fn test_normalized_name_only() {
        let dir = fixture();
        let store = ContentStore::skills(dir.path());

        let entry = store.get("my-skill").await.unwrap();
        assert_eq!(entry.description, "About My Skill");

        let err = store.get("My Skill").await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_unknown_name_not_found() {
        let dir = fixture();
        let store = ContentStore::skills(dir.path());

        assert!(matches!(
            store.get("missing").await.unwrap_err(),
            RetrievalError::NotFound { .. }
        ));
        assert!(matches!(
            store.content("missing", None).await.unwrap_err(),
            RetrievalError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_sub_resource_is_read_error() {
        let dir = fixture();
        let store = ContentStore::skills(dir.path());

        let err = store
            .content("design-postgres-tables", Some("nope.sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Read { .. }));
    }

    #[tokio::test]
    async fn test_sub_path_traversal_rejected() {
        let dir = fixture();
        let store = ContentStore::skills(dir.path());

        for bad in ["../b-hyper/SKILL.md", "/etc/passwd", "."] {
            let err = store
                .content("design-postgres-tables", Some(bad))
                .await
                .unwrap_err();
            assert!(matches!(err, RetrievalError::Validation(_)), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_content_strips_frontmatter() {
        let dir = fixture();
        let store = ContentStore::skills(dir.path());

        let body = store.content("design-postgres-tables", None).await.unwrap();
        assert_eq!(body, "# Tables\nUse BIGINT keys.");
    }

    #[tokio::test]
    async fn test_content_cached_after_delete() {
        let dir = fixture();
        let root = dir.path();
        fs::write(root.join("a-tables").join("example.sql"), "CREATE TABLE t (id bigint);").unwrap();

        let store = ContentStore::skills(root);
        let first = store
            .content("design-postgres-tables", Some("example.sql"))
            .await
            .unwrap();

        fs::remove_file(root.join("a-tables").join("example.sql")).unwrap();
        fs::remove_file(root.join("a-tables").join(SKILL_MANIFEST)).unwrap();

        let second = store
            .content("design-postgres-tables", Some("example.sql"))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second, "CREATE TABLE t (id bigint);");
    }

    #[tokio::test]
    async fn test_forced_reload_clears_cache() {
        let dir = fixture();
        let root = dir.path();
        let store = ContentStore::skills(root);

        let before = store.content("setup-hypertables", None).await.unwrap();
        assert_eq!(before, "# Hypertables");

        write_skill(root, "b-hyper", "setup-hypertables", "# Hypertables v2");
        assert_eq!(store.content("setup-hypertables", None).await.unwrap(), before);

        store.reload(true).await.unwrap();
        assert_eq!(
            store.content("setup-hypertables", None).await.unwrap(),
            "# Hypertables v2"
        );
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_documents() {
        let dir = fixture();
        let root = dir.path();
        let store = ContentStore::skills(root);

        let first = store.reload(false).await.unwrap();
        write_skill(root, "z-new", "compression", "# Compression");

        let cached = store.reload(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &cached));
        assert!(cached.get("compression").is_none());

        let fresh = store.reload(true).await.unwrap();
        assert!(fresh.get("compression").is_some());
        assert!(first.get("compression").is_none());
    }

    #[tokio::test]
    async fn test_discover_is_idempotent() {
        let dir = fixture();
        let store = ContentStore::skills(dir.path());

        assert_eq!(store.discover().names(), store.discover().names());
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::guides(dir.path().join("nope"));

        let registry = store.reload(false).await.unwrap();
        assert!(registry.is_empty());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_reloads_share_result() {
        let dir = fixture();
        let store = ContentStore::skills(dir.path());

        let registries =
            futures::future::join_all((0..8).map(|_| store.reload(true))).await;

        let first = registries[0].as_ref().unwrap();
        assert_eq!(first.len(), 3);
        for registry in &registries {
            assert!(Arc::ptr_eq(first, registry.as_ref().unwrap()));
        }

        let current = store.reload(false).await.unwrap();
        assert!(Arc::ptr_eq(first, &current));

        // 완료 후의 강제 리로드는 새 스캔
        let fresh = store.reload(true).await.unwrap();
        assert!(!Arc::ptr_eq(first, &fresh));
    }

    #[tokio::test]
    async fn test_equivalent_sub_paths_share_cache() {
        let dir = fixture();
        let root = dir.path();
        fs::create_dir_all(root.join("a-tables").join("sql")).unwrap();
        fs::write(root.join("a-tables").join("sql").join("keys.sql"), "-- keys").unwrap();
        let store = ContentStore::skills(root);

        let body = store.content("design-postgres-tables", None).await.unwrap();
        for alias in ["./SKILL.md", "SKILL.md", "./././SKILL.md"] {
            assert_eq!(
                store.content("design-postgres-tables", Some(alias)).await.unwrap(),
                body,
                "{}",
                alias
            );
        }

        let nested = store
            .content("design-postgres-tables", Some("sql//keys.sql"))
            .await
            .unwrap();
        fs::remove_file(root.join("a-tables").join("sql").join("keys.sql")).unwrap();
        assert_eq!(
            store
                .content("design-postgres-tables", Some("./sql/keys.sql"))
                .await
                .unwrap(),
            nested
        );
    }

    #[test]
    fn test_normalize_sub_path() {
        assert_eq!(normalize_sub_path("./SKILL.md").unwrap(), "SKILL.md");
        assert_eq!(normalize_sub_path("sql//keys.sql").unwrap(), "sql/keys.sql");
        assert!(normalize_sub_path("sql/../../x").is_err());
        assert!(normalize_sub_path("/etc/passwd").is_err());
        assert!(normalize_sub_path("./.").is_err());
    }

    #[tokio::test]
    async fn test_document_uses_name_as_default_title() {
        let dir = fixture();
        let root = dir.path();
        fs::create_dir_all(root.join("g-titled")).unwrap();
        fs::write(
            root.join("g-titled").join(SKILL_MANIFEST),
            "---\nname: titled\ndescription: d\ntitle: A Title\n---\nbody",
        )
        .unwrap();
        let store = ContentStore::skills(root);

        let doc = store.document("titled", None).await.unwrap();
        assert_eq!(doc.title, "A Title");
        assert_eq!(doc.content, "body");

        let doc = store.document("setup-hypertables", None).await.unwrap();
        assert_eq!(doc.title, "setup-hypertables");
        assert_eq!(doc.description, "About setup-hypertables");
    }
}
