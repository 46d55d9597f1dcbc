//! Discovery, trust decisions and install/uninstall through the manager

mod common;

use async_trait::async_trait;
use common::{write_plugin_json, TestClient};
use parking_lot::Mutex;
use plinth_core::plugin::{SignatureManifest, MANIFEST_FILE};
use plinth_core::{
    Error, FsLoader, InstallOpts, Installer, LoadedPlugin, PluginClass, PluginDescriptor,
    PluginManager, PluginType, Result, SignatureStatus, SignatureType, UpdateInfo,
};
use plinth_foundation::HostConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// 설치 요청을 기록하고 plugin.json만 써주는 설치기
#[derive(Default)]
struct FakeInstaller {
    installs: Mutex<Vec<(String, String, Option<String>)>>,
    uninstalls: Mutex<Vec<PathBuf>>,
    update_repos: Mutex<Vec<String>>,
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn install(
        &self,
        plugin_id: &str,
        version: &str,
        plugins_dir: &Path,
        _archive_url: Option<&str>,
        repo_url: Option<&str>,
    ) -> Result<()> {
        self.installs
            .lock()
            .push((plugin_id.to_string(), version.to_string(), repo_url.map(str::to_string)));
        write_plugin_json(&plugins_dir.join(plugin_id), plugin_id, "panel", false);
        Ok(())
    }

    async fn uninstall(&self, plugin_dir: &Path) -> Result<()> {
        self.uninstalls.lock().push(plugin_dir.to_path_buf());
        std::fs::remove_dir_all(plugin_dir)?;
        Ok(())
    }

    async fn get_update_info(&self, plugin_id: &str, version: &str, repo_url: &str) -> Result<UpdateInfo> {
        self.update_repos.lock().push(repo_url.to_string());
        Ok(UpdateInfo {
            version: version.to_string(),
            plugin_archive_url: plinth_core::plugin::download_url(repo_url, plugin_id, version),
        })
    }
}

fn sign_checksums(dir: &Path, id: &str) {
    let mut manifest = SignatureManifest {
        manifest_version: "2.0.0".to_string(),
        signature_type: "community".to_string(),
        signed_by_org: "plinth".to_string(),
        signed_by_org_name: "Plinth Labs".to_string(),
        plugin: id.to_string(),
        version: "1.0.0".to_string(),
        ..Default::default()
    };
    manifest.collect_files(dir).unwrap();
    std::fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec(&manifest).unwrap()).unwrap();
}

struct Layout {
    temp: TempDir,
    static_root: PathBuf,
    bundled: PathBuf,
    plugins: PathBuf,
}

impl Layout {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let static_root = temp.path().join("public");
        let bundled = temp.path().join("bundled");
        let plugins = temp.path().join("plugins");
        std::fs::create_dir_all(&plugins).unwrap();
        Self {
            temp,
            static_root,
            bundled,
            plugins,
        }
    }

    fn config(&self) -> HostConfig {
        HostConfig::default()
            .with_static_root_path(&self.static_root)
            .with_bundled_plugins_path(&self.bundled)
            .with_plugins_path(&self.plugins)
    }

    fn loader(&self) -> FsLoader {
        FsLoader::new()
            .with_class_root(self.static_root.join("app/plugins"), PluginClass::Core)
            .with_class_root(&self.bundled, PluginClass::Bundled)
    }

    fn manager(&self, config: HostConfig, installer: Arc<FakeInstaller>) -> PluginManager {
        PluginManager::new(config, Arc::new(self.loader()), installer)
    }
}

#[tokio::test]
async fn test_init_applies_trust_policy() {
    let layout = Layout::new();
    write_plugin_json(&layout.static_root.join("app/plugins/panel/graph"), "graph", "panel", false);
    write_plugin_json(&layout.bundled.join("bundled-app"), "bundled-app", "app", false);

    let valid = layout.plugins.join("valid-ds");
    write_plugin_json(&valid, "valid-ds", "datasource", true);
    sign_checksums(&valid, "valid-ds");

    let modified = layout.plugins.join("modified-ds");
    write_plugin_json(&modified, "modified-ds", "datasource", true);
    sign_checksums(&modified, "modified-ds");
    std::fs::write(modified.join("extra.js"), "tampered").unwrap();

    write_plugin_json(&layout.plugins.join("unsigned-panel"), "unsigned-panel", "panel", false);
    write_plugin_json(&layout.plugins.join("allowed-panel"), "allowed-panel", "panel", false);

    let config = layout.config().with_allow_unsigned("allowed-panel");
    let manager = layout.manager(config, Arc::new(FakeInstaller::default()));
    manager.init().await.unwrap();

    let graph = manager.plugin("graph").await.unwrap();
    assert_eq!(graph.class, PluginClass::Core);
    assert_eq!(graph.signature, SignatureStatus::Internal);
    assert_eq!(graph.module, "app/plugins/panel/graph/module");

    let bundled = manager.plugin("bundled-app").await.unwrap();
    assert_eq!(bundled.class, PluginClass::Bundled);
    assert_eq!(bundled.signature, SignatureStatus::Internal);

    let valid = manager.plugin("valid-ds").await.unwrap();
    assert_eq!(valid.signature, SignatureStatus::Valid);
    assert_eq!(valid.signature_type, SignatureType::Community);
    assert_eq!(valid.signature_org, "Plinth Labs");
    assert!(valid.signed_files.contains("plugin.json"));

    assert!(manager.is_registered("allowed-panel").await);
    assert!(!manager.is_registered("modified-ds").await);
    assert!(!manager.is_registered("unsigned-panel").await);

    let errors = manager.signature_errors("modified-ds").await.unwrap();
    assert_eq!(errors[0].to_string(), "plugin 'modified-ds' has a modified signature");
    let errors = manager.signature_errors("unsigned-panel").await.unwrap();
    assert_eq!(errors[0].to_string(), "plugin 'unsigned-panel' is unsigned");
    assert!(manager.signature_errors("valid-ds").await.is_none());
    assert_eq!(manager.plugin_errors().await.len(), 2);

    // 라우트는 백엔드 플러그인만
    let routes = manager.routes().await;
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].plugin_id, "valid-ds");
    assert_eq!(routes[0].directory, valid.plugin_dir);

    let panels = manager.plugins_of_type(PluginType::Panel).await;
    let ids: Vec<_> = panels.iter().map(|p| p.id.as_str()).collect();
    assert!(ids.contains(&"graph"));
    assert!(ids.contains(&"allowed-panel"));

    // 재실행해도 변하지 않음
    manager.init().await.unwrap();
    assert_eq!(manager.plugins().await.len(), 4);
    assert_eq!(manager.plugin_errors().await.len(), 2);
}

#[tokio::test]
async fn test_development_mode_is_permissive() {
    let layout = Layout::new();
    write_plugin_json(&layout.plugins.join("unsigned-panel"), "unsigned-panel", "panel", false);

    let config = layout.config().with_env(plinth_foundation::HostEnv::Development);
    let manager = layout.manager(config, Arc::new(FakeInstaller::default()));
    manager.init().await.unwrap();

    let plugin = manager.plugin("unsigned-panel").await.unwrap();
    assert_eq!(plugin.signature, SignatureStatus::Unsigned);
}

#[tokio::test]
async fn test_install_and_uninstall() {
    let layout = Layout::new();
    let installer = Arc::new(FakeInstaller::default());
    let config = layout
        .config()
        .with_allow_unsigned("test-panel")
        .with_repository_url("https://plugins.example.com/api/plugins");
    let manager = layout.manager(config, installer.clone());
    let token = CancellationToken::new();

    manager
        .install(&token, "test-panel", "1.0.0", InstallOpts::default())
        .await
        .unwrap();
    let installs = installer.installs.lock().clone();
    assert_eq!(
        installs,
        vec![(
            "test-panel".to_string(),
            "1.0.0".to_string(),
            Some("https://plugins.example.com/api/plugins".to_string())
        )]
    );

    let plugin = manager.plugin("test-panel").await.unwrap();
    assert_eq!(plugin.plugin_dir, layout.plugins.join("test-panel"));

    // 이미 설치된 플러그인
    let err = manager
        .install(&token, "test-panel", "1.0.0", InstallOpts::default())
        .await
        .unwrap_err();
    match err {
        Error::DuplicatePlugin { existing_dir, .. } => assert_eq!(existing_dir, plugin.plugin_dir),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(installer.installs.lock().len(), 1);

    manager.uninstall(&token, "test-panel").await.unwrap();
    assert!(!manager.is_registered("test-panel").await);
    assert_eq!(installer.uninstalls.lock().clone(), vec![layout.plugins.join("test-panel")]);

    let err = manager.uninstall(&token, "test-panel").await.unwrap_err();
    assert!(matches!(err, Error::NotInstalled(_)));
}

#[tokio::test]
async fn test_install_rejected_by_trust() {
    let layout = Layout::new();
    let manager = layout.manager(layout.config(), Arc::new(FakeInstaller::default()));

    let err = manager
        .install(
            &CancellationToken::new(),
            "test-panel",
            "1.0.0",
            InstallOpts::archive("https://example.com/test-panel.tar.gz"),
        )
        .await
        .unwrap_err();
    assert!(err.is_trust_error());
    assert!(!manager.is_registered("test-panel").await);
}

#[tokio::test]
async fn test_install_cancelled() {
    let layout = Layout::new();
    let installer = Arc::new(FakeInstaller::default());
    let manager = layout.manager(layout.config(), installer.clone());

    let token = CancellationToken::new();
    token.cancel();
    let err = manager
        .install(&token, "test-panel", "1.0.0", InstallOpts::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_core_plugins_cannot_be_uninstalled() {
    let layout = Layout::new();
    write_plugin_json(&layout.bundled.join("bundled-app"), "bundled-app", "app", false);
    let installer = Arc::new(FakeInstaller::default());
    let manager = layout.manager(layout.config(), installer.clone());
    manager.init().await.unwrap();

    let err = manager
        .uninstall(&CancellationToken::new(), "bundled-app")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UninstallCorePlugin(_)));
    assert!(manager.is_registered("bundled-app").await);
    assert!(installer.uninstalls.lock().is_empty());
}

#[tokio::test]
async fn test_update_info_uses_configured_repository() {
    let layout = Layout::new();
    let installer = Arc::new(FakeInstaller::default());
    let config = layout.config().with_repository_url("https://plugins.example.com/api/plugins");
    let manager = layout.manager(config, installer.clone());

    let info = manager.update_info("test-panel", "2.0.0").await.unwrap();
    assert_eq!(
        info.plugin_archive_url,
        "https://plugins.example.com/api/plugins/test-panel/versions/2.0.0/download"
    );
    assert_eq!(
        installer.update_repos.lock().clone(),
        vec!["https://plugins.example.com/api/plugins".to_string()]
    );
}

/// 디스크에 설치된 백엔드 플러그인을 클라이언트와 함께 등록
async fn register_installed(layout: &Layout, manager: &PluginManager, client: &Arc<TestClient>) -> PathBuf {
    let dir = layout.plugins.join("test-ds");
    write_plugin_json(&dir, "test-ds", "datasource", true);
    let descriptor = PluginDescriptor::new("test-ds", PluginType::Datasource, dir.clone())
        .with_backend(Some("gpx_test-ds".to_string()));
    manager
        .register_and_start(LoadedPlugin::new(descriptor).with_client(client.clone()))
        .await
        .unwrap();
    dir
}

#[tokio::test]
async fn test_uninstall_completes_when_stop_fails() {
    let layout = Layout::new();
    let installer = Arc::new(FakeInstaller::default());
    let manager = layout.manager(layout.config(), installer.clone());
    let client = Arc::new(TestClient::new("test-ds", true));
    let dir = register_installed(&layout, &manager, &client).await;

    client.fail_stop();
    manager.uninstall(&CancellationToken::new(), "test-ds").await.unwrap();

    assert_eq!(client.stops(), 1);
    assert!(!manager.is_registered("test-ds").await);
    assert_eq!(installer.uninstalls.lock().clone(), vec![dir.clone()]);
    assert!(!dir.exists());

    let err = manager.uninstall(&CancellationToken::new(), "test-ds").await.unwrap_err();
    assert!(matches!(err, Error::NotInstalled(_)));
}

#[tokio::test]
async fn test_cancelled_uninstall_keeps_plugin_registered() {
    let layout = Layout::new();
    let installer = Arc::new(FakeInstaller::default());
    let manager = layout.manager(layout.config(), installer.clone());
    let client = Arc::new(TestClient::new("test-ds", true));
    let dir = register_installed(&layout, &manager, &client).await;

    let token = CancellationToken::new();
    token.cancel();
    let err = manager.uninstall(&token, "test-ds").await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    assert!(manager.is_registered("test-ds").await);
    assert!(dir.exists());
    assert_eq!(client.stops(), 0);
    assert!(installer.uninstalls.lock().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_plugin_is_registered() {
    let layout = Layout::new();
    let target = layout.temp.path().join("sources").join("linked-ds");
    write_plugin_json(&target, "linked-ds", "datasource", true);
    std::os::unix::fs::symlink(&target, layout.plugins.join("linked-ds")).unwrap();

    let config = layout.config().with_allow_unsigned("linked-ds");
    let manager = layout.manager(config, Arc::new(FakeInstaller::default()));
    manager.init().await.unwrap();

    assert!(manager.is_registered("linked-ds").await);
    assert!(manager.plugin_errors().await.is_empty());

    let target = target.canonicalize().unwrap();
    assert_eq!(manager.plugin("linked-ds").await.unwrap().plugin_dir, target);
    let routes = manager.routes().await;
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].directory, target);
}
