//! Plugin Installer - 플러그인 다운로드 및 설치
//!
//! 플러그인 저장소나 아카이브 URL, 로컬 경로에서 플러그인을 받아
//! 플러그인 디렉토리에 풀어 놓습니다.

use super::loader::PLUGIN_JSON;
use async_trait::async_trait;
use plinth_foundation::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

/// 설치 옵션
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOpts {
    /// 직접 받을 아카이브 (URL 또는 로컬 경로)
    pub archive_url: Option<String>,
    /// 저장소 URL (미지정 시 호스트 설정 사용)
    pub repo_url: Option<String>,
}

impl InstallOpts {
    pub fn archive(url: impl Into<String>) -> Self {
        Self {
            archive_url: Some(url.into()),
            repo_url: None,
        }
    }
}

/// 업데이트 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub version: String,
    pub plugin_archive_url: String,
}

/// 플러그인 설치기
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(
        &self,
        plugin_id: &str,
        version: &str,
        plugins_dir: &Path,
        archive_url: Option<&str>,
        repo_url: Option<&str>,
    ) -> Result<()>;

    async fn uninstall(&self, plugin_dir: &Path) -> Result<()>;

    async fn get_update_info(&self, plugin_id: &str, version: &str, repo_url: &str) -> Result<UpdateInfo>;
}

// ============================================================================
// 저장소 API
// ============================================================================

#[derive(Debug, Deserialize)]
struct VersionList {
    #[serde(default)]
    items: Vec<VersionItem>,
}

#[derive(Debug, Deserialize)]
struct VersionItem {
    version: String,
}

pub fn download_url(repo_url: &str, plugin_id: &str, version: &str) -> String {
    format!("{}/{}/versions/{}/download", repo_url.trim_end_matches('/'), plugin_id, version)
}

/// 요청 버전이 있으면 그것, 비어 있으면 최신 (목록 첫 항목)
fn select_version(available: &[String], requested: &str) -> Option<String> {
    if requested.is_empty() {
        return available.first().cloned();
    }
    available.iter().find(|v| v.as_str() == requested).cloned()
}

// ============================================================================
// ArchiveInstaller
// ============================================================================

/// tar.gz 아카이브 기반 설치기
#[derive(Debug, Clone, Default)]
pub struct ArchiveInstaller {
    /// HTTP 클라이언트
    client: Client,
}

impl ArchiveInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// 원격 아카이브를 받아 풀고 플러그인 루트를 돌려줌
    async fn fetch_remote(&self, url: &str, work_dir: &Path) -> Result<PathBuf> {
        let archive_path = work_dir.join("archive.tar.gz");
        self.download_file(url, &archive_path).await?;

        let extract_dir = work_dir.join("extracted");
        fs::create_dir_all(&extract_dir).await?;
        extract_tarball(&archive_path, &extract_dir).await?;
        find_plugin_root(&extract_dir)
    }

    async fn fetch_local(&self, path: &Path, work_dir: &Path) -> Result<PathBuf> {
        if path.is_dir() {
            return find_plugin_root(path);
        }

        let extract_dir = work_dir.join("extracted");
        fs::create_dir_all(&extract_dir).await?;
        extract_tarball(path, &extract_dir).await?;
        find_plugin_root(&extract_dir)
    }

    /// 파일 다운로드
    async fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        debug!("Downloading {} to {:?}", url, dest);

        let response = self
            .client
            .get(url)
            .header("User-Agent", "Plinth")
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!("Failed to download: HTTP {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| Error::Http(e.to_string()))?;

        fs::write(dest, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl Installer for ArchiveInstaller {
    async fn install(
        &self,
        plugin_id: &str,
        version: &str,
        plugins_dir: &Path,
        archive_url: Option<&str>,
        repo_url: Option<&str>,
    ) -> Result<()> {
        let source = match (archive_url, repo_url) {
            (Some(url), _) => url.to_string(),
            (None, Some(repo)) => download_url(repo, plugin_id, version),
            (None, None) => {
                return Err(Error::Config(format!(
                    "no archive or repository URL to install plugin {} from",
                    plugin_id
                )))
            }
        };
        info!("Installing plugin {} v{} from {}", plugin_id, version, source);

        // 임시 디렉토리에서 작업
        let work_dir = std::env::temp_dir().join(format!("plinth_plugin_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&work_dir).await?;

        let fetched = if source.starts_with("http://") || source.starts_with("https://") {
            self.fetch_remote(&source, &work_dir).await
        } else {
            self.fetch_local(Path::new(&source), &work_dir).await
        };

        let result = match fetched {
            Ok(plugin_root) => {
                let target_dir = plugins_dir.join(plugin_id);
                if target_dir.exists() {
                    debug!("Replacing existing plugin directory {:?}", target_dir);
                    fs::remove_dir_all(&target_dir).await?;
                }
                copy_dir_recursive(&plugin_root, &target_dir).await
            }
            Err(e) => Err(e),
        };

        // 임시 디렉토리 정리
        let _ = fs::remove_dir_all(&work_dir).await;

        result?;
        info!("Installed plugin {} into {:?}", plugin_id, plugins_dir);
        Ok(())
    }

    async fn uninstall(&self, plugin_dir: &Path) -> Result<()> {
        if !plugin_dir.join(PLUGIN_JSON).exists() {
            return Err(Error::Validation(format!(
                "tried to remove {:?}, but it doesn't seem to be a plugin",
                plugin_dir
            )));
        }

        fs::remove_dir_all(plugin_dir).await?;
        info!("Removed plugin directory {:?}", plugin_dir);
        Ok(())
    }

    async fn get_update_info(&self, plugin_id: &str, version: &str, repo_url: &str) -> Result<UpdateInfo> {
        let url = format!("{}/{}/versions", repo_url.trim_end_matches('/'), plugin_id);
        debug!("Fetching versions of {} from {}", plugin_id, url);

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "Plinth")
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "Failed to fetch versions of {}: HTTP {}",
                plugin_id,
                response.status()
            )));
        }

        let list: VersionList = response.json().await.map_err(|e| Error::Http(e.to_string()))?;
        let available: Vec<String> = list.items.into_iter().map(|item| item.version).collect();

        let version = select_version(&available, version)
            .ok_or_else(|| Error::NotFound(format!("version {} of plugin {}", version, plugin_id)))?;

        Ok(UpdateInfo {
            plugin_archive_url: download_url(repo_url, plugin_id, &version),
            version,
        })
    }
}

// ============================================================================
// 유틸리티
// ============================================================================

/// tarball 압축 해제
async fn extract_tarball(archive: &Path, dest: &Path) -> Result<()> {
    debug!("Extracting {:?} to {:?}", archive, dest);

    // tar -xzf 명령 사용 (Windows 10 1803+ 포함)
    let output = tokio::process::Command::new("tar")
        .args(["-xzf", &archive.to_string_lossy(), "-C", &dest.to_string_lossy()])
        .output()
        .await?;

    if !output.status.success() {
        return Err(Error::Internal(format!(
            "Failed to extract archive: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(())
}

/// 가장 얕은 `plugin.json`을 가진 디렉토리
fn find_plugin_root(dir: &Path) -> Result<PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .max_depth(3)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == PLUGIN_JSON)
        .min_by_key(|entry| entry.depth())
        .and_then(|entry| entry.path().parent().map(Path::to_path_buf))
        .ok_or_else(|| Error::NotFound(format!("{} not found in {:?}", PLUGIN_JSON, dir)))
}

/// 디렉토리 재귀 복사
async fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    if !dest.exists() {
        fs::create_dir_all(dest).await?;
    }

    let mut entries = fs::read_dir(src).await?;

    while let Some(entry) = entries.next_entry().await? {
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if src_path.is_dir() {
            Box::pin(copy_dir_recursive(&src_path, &dest_path)).await?;
        } else {
            fs::copy(&src_path, &dest_path).await?;
        }
    }

    Ok(())
}

// ============================================================================
// 테스트
// ============================================================================
