//! Plugin Loader - 플러그인 발견 및 로드
//!
//! 디렉토리 트리에서 `plugin.json`을 찾아 [`LoadedPlugin`]을 만듭니다.
//! 서명 검증은 하지 않습니다 (매니저가 등록 전에 수행).

use super::descriptor::*;
use super::traits::PluginFactory;
use async_trait::async_trait;
use plinth_foundation::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 플러그인 메타데이터 파일명
pub const PLUGIN_JSON: &str = "plugin.json";

/// 플러그인 로더
#[async_trait]
pub trait Loader: Send + Sync {
    /// `paths` 아래의 플러그인을 모두 로드 (`ignore`에 있는 ID는 건너뜀)
    async fn load(&self, paths: &[PathBuf], ignore: &HashSet<String>) -> Result<Vec<LoadedPlugin>>;

    /// 단일 플러그인 디렉토리를 주어진 팩토리로 로드 (in-process core 플러그인용)
    async fn load_with_factory(&self, plugin_dir: &Path, factory: PluginFactory) -> Result<LoadedPlugin>;
}

// ============================================================================
// plugin.json
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginJsonFile {
    id: String,
    #[serde(rename = "type")]
    plugin_type: PluginType,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    info: PluginInfo,
    #[serde(default)]
    dependencies: PluginDependencies,
    #[serde(default)]
    backend: bool,
    #[serde(default)]
    executable: Option<String>,
}

impl PluginJsonFile {
    fn into_descriptor(self, plugin_dir: PathBuf, class: PluginClass) -> PluginDescriptor {
        let mut descriptor = PluginDescriptor {
            name: if self.name.is_empty() { self.id.clone() } else { self.name },
            id: self.id,
            plugin_type: self.plugin_type,
            state: self.state,
            info: self.info,
            dependencies: self.dependencies,
            plugin_dir,
            class,
            backend: self.backend,
            executable: self.executable,
            ..Default::default()
        };
        set_asset_paths(&mut descriptor);
        descriptor
    }
}

/// module/base URL 및 로고/스크린샷 경로
fn set_asset_paths(descriptor: &mut PluginDescriptor) {
    let (module, base_url) = match descriptor.class {
        PluginClass::Core => (
            format!("app/plugins/{}/{}/module", descriptor.plugin_type, descriptor.id),
            format!("public/app/plugins/{}/{}", descriptor.plugin_type, descriptor.id),
        ),
        _ => (
            format!("plugins/{}/module", descriptor.id),
            format!("public/plugins/{}", descriptor.id),
        ),
    };

    let default_logo = format!("public/img/icn-{}.svg", descriptor.plugin_type);
    let logos = &mut descriptor.info.logos;
    logos.small = asset_path(&base_url, &logos.small, &default_logo);
    logos.large = asset_path(&base_url, &logos.large, &default_logo);
    for screenshot in &mut descriptor.info.screenshots {
        screenshot.path = asset_path(&base_url, &screenshot.path, "");
    }

    descriptor.module = module;
    descriptor.base_url = base_url;
}

fn asset_path(base_url: &str, path: &str, fallback: &str) -> String {
    if path.is_empty() {
        fallback.to_string()
    } else if path.starts_with("http://") || path.starts_with("https://") || path.starts_with("public/") {
        path.to_string()
    } else {
        format!("{}/{}", base_url, path.trim_start_matches('/'))
    }
}

async fn read_plugin_json(path: &Path) -> Result<PluginJsonFile> {
    let content = fs::read_to_string(path).await?;
    let json: PluginJsonFile = serde_json::from_str(&content)?;
    if json.id.is_empty() {
        return Err(Error::Validation(format!("{:?} has an empty plugin id", path)));
    }
    Ok(json)
}

// ============================================================================
// FsLoader
// ============================================================================

/// 파일 시스템 기반 로더
#[derive(Clone, Default)]
pub struct FsLoader {
    /// 경로 접두사 -> 플러그인 출처 (그 외는 External)
    class_roots: Vec<(PathBuf, PluginClass)>,
    /// 백엔드 플러그인용 클라이언트 팩토리
    factory: Option<PluginFactory>,
}

impl FsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, factory: PluginFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// `root` 아래에서 발견된 플러그인을 `class`로 분류
    pub fn with_class_root(mut self, root: impl Into<PathBuf>, class: PluginClass) -> Self {
        self.class_roots.push((root.into(), class));
        self
    }

    fn class_for(&self, plugin_dir: &Path) -> PluginClass {
        self.class_roots
            .iter()
            .find(|(root, _)| plugin_dir.starts_with(root))
            .map(|(_, class)| *class)
            .unwrap_or(PluginClass::External)
    }

    /// `plugin.json` 경로들 - 얕은 것부터 (부모 플러그인이 우선)
    fn find_plugin_jsons(root: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry under {:?}: {}", root, e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == PLUGIN_JSON)
            .map(|entry| entry.into_path())
            .collect();

        found.sort_by(|a, b| {
            a.components()
                .count()
                .cmp(&b.components().count())
                .then_with(|| a.cmp(b))
        });
        found
    }
}

/// 플러그인 디렉토리 자체가 심볼릭 링크면 대상 경로로
async fn resolve_plugin_dir(plugin_dir: PathBuf) -> PathBuf {
    match fs::symlink_metadata(&plugin_dir).await {
        Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(&plugin_dir).await {
            Ok(target) => {
                debug!("Resolved symlinked plugin dir {:?} -> {:?}", plugin_dir, target);
                target
            }
            Err(e) => {
                warn!("Failed to resolve plugin dir {:?}: {}", plugin_dir, e);
                plugin_dir
            }
        },
        _ => plugin_dir,
    }
}

#[async_trait]
impl Loader for FsLoader {
    async fn load(&self, paths: &[PathBuf], ignore: &HashSet<String>) -> Result<Vec<LoadedPlugin>> {
        let mut loaded = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for root in paths {
            if !root.exists() {
                debug!("Plugin path {:?} does not exist, skipping", root);
                continue;
            }

            for json_path in Self::find_plugin_jsons(root) {
                let json = match read_plugin_json(&json_path).await {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to parse plugin metadata {:?}: {}", json_path, e);
                        continue;
                    }
                };

                if ignore.contains(&json.id) {
                    debug!("Plugin {} is already registered, skipping", json.id);
                    continue;
                }
                if !seen.insert(json.id.clone()) {
                    warn!("Skipping duplicate plugin {} at {:?}", json.id, json_path);
                    continue;
                }

                let plugin_dir = json_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.clone());
                // 출처는 스캔한 경로 기준, 디렉토리는 링크 대상 기준
                let class = self.class_for(&plugin_dir);
                let plugin_dir = resolve_plugin_dir(plugin_dir).await;
                let descriptor = json.into_descriptor(plugin_dir, class);

                let mut plugin = LoadedPlugin::new(descriptor);
                if plugin.descriptor.backend {
                    if let Some(factory) = &self.factory {
                        match factory(&plugin.descriptor) {
                            Ok(client) => plugin.client = Some(client),
                            Err(e) => {
                                warn!("Failed to create client for plugin {}: {}", plugin.id(), e);
                                continue;
                            }
                        }
                    }
                }

                debug!("Found plugin: {} at {:?}", plugin.id(), plugin.descriptor.plugin_dir);
                loaded.push(plugin);
            }
        }

        info!("Loaded {} plugins", loaded.len());
        Ok(loaded)
    }

    async fn load_with_factory(&self, plugin_dir: &Path, factory: PluginFactory) -> Result<LoadedPlugin> {
        let json_path = plugin_dir.join(PLUGIN_JSON);
        if !json_path.exists() {
            return Err(Error::NotFound(format!("{:?}", json_path)));
        }

        let json = read_plugin_json(&json_path).await?;
        let descriptor = json.into_descriptor(plugin_dir.to_path_buf(), self.class_for(plugin_dir));
        let client = factory(&descriptor)?;
        Ok(LoadedPlugin::new(descriptor).with_client(client))
    }
}
