//! Plugin Manager - 플러그인 라이프사이클 관리
//!
//! 로더가 찾은 플러그인을 서명 검증 후 등록하고, 백엔드 프로세스를
//! 감독하며, 원격 메서드 호출을 해당 클라이언트로 전달합니다.
//!
//! ```ignore
//! let manager = PluginManager::new(config, Arc::new(loader), Arc::new(ArchiveInstaller::new()));
//! manager.init().await?;
//!
//! let token = CancellationToken::new();
//! tokio::spawn(async move { manager.run(&token).await });
//! ```

use super::backend::*;
use super::descriptor::{LoadedPlugin, PluginDescriptor, PluginRoute, PluginType, SignatureStatus};
use super::dispatch::PluginDispatcher;
use super::installer::{InstallOpts, Installer, UpdateInfo};
use super::loader::Loader;
use super::registry::{PluginRegistry, RegisteredPlugin};
use super::signature::SignatureVerifier;
use super::traits::{
    AllowAllValidator, CallResourceResponseSender, Licensing, OpenSourceLicensing, RequestValidator,
};
use futures::future::join_all;
use plinth_foundation::{Error, HostConfig, Result, SignatureErrorKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 검증에서 거부된 플러그인 기록
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginDiagnostic {
    pub plugin_id: String,
    pub plugin_dir: PathBuf,
    pub signature: SignatureStatus,
    pub errors: Vec<SignatureErrorKind>,
}

impl PluginDiagnostic {
    pub fn errors(&self) -> Vec<Error> {
        self.errors
            .iter()
            .map(|kind| Error::signature(&self.plugin_id, *kind))
            .collect()
    }
}

/// 플러그인 매니저 - 전체 플러그인 시스템 관리
pub struct PluginManager {
    /// 호스트 설정
    config: HostConfig,

    /// 플러그인 레지스트리
    registry: Arc<PluginRegistry>,

    verifier: SignatureVerifier,
    dispatcher: PluginDispatcher,
    loader: Arc<dyn Loader>,
    installer: Arc<dyn Installer>,
    licensing: Arc<dyn Licensing>,

    /// 서명 검증 실패 기록 (plugin id 순)
    diagnostics: RwLock<BTreeMap<String, PluginDiagnostic>>,

    /// 등록 시 시작된 monitor들의 부모 토큰
    lifetime: CancellationToken,
}

impl PluginManager {
    /// 새 매니저 생성
    pub fn new(config: HostConfig, loader: Arc<dyn Loader>, installer: Arc<dyn Installer>) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        Self {
            verifier: SignatureVerifier::new(config.signature_policy()),
            dispatcher: PluginDispatcher::new(Arc::clone(&registry), Arc::new(AllowAllValidator)),
            config,
            registry,
            loader,
            installer,
            licensing: Arc::new(OpenSourceLicensing),
            diagnostics: RwLock::new(BTreeMap::new()),
            lifetime: CancellationToken::new(),
        }
    }

    pub fn with_licensing(mut self, licensing: Arc<dyn Licensing>) -> Self {
        self.licensing = licensing;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn RequestValidator>) -> Self {
        self.dispatcher = PluginDispatcher::new(Arc::clone(&self.registry), validator);
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn licensing(&self) -> &Arc<dyn Licensing> {
        &self.licensing
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    // ========================================================================
    // 초기화
    // ========================================================================

    /// 검색 경로 (core -> bundled -> external -> pluginSettings 순)
    pub fn plugin_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        paths.extend(self.config.core_plugins_path());
        paths.extend(self.config.bundled_plugins_path.clone());
        paths.extend(self.config.plugins_path.clone());
        paths.extend(self.config.plugin_setting_paths());
        paths
    }

    /// 모든 검색 경로에서 플러그인을 로드하고 등록
    ///
    /// 이미 등록된 플러그인은 건너뛰므로 여러 번 호출해도 안전합니다.
    pub async fn init(&self) -> Result<()> {
        let paths = self.plugin_paths();
        info!("Initializing plugins from {} paths", paths.len());

        let loaded = self.loader.load(&paths, &self.registry.ids().await).await?;
        for plugin in loaded {
            let id = plugin.id().to_string();
            if let Err(e) = self.admit(plugin).await {
                match e {
                    Error::Signature { .. } => debug!("Skipping plugin {}: {}", id, e),
                    other => error!("Failed to register plugin {}: {}", id, other),
                }
            }
        }

        info!(
            "Plugin initialization complete: {} registered, {} rejected",
            self.registry.len().await,
            self.diagnostics.read().await.len()
        );
        Ok(())
    }

    /// 서명 검증 후 등록
    async fn admit(&self, mut plugin: LoadedPlugin) -> Result<()> {
        let outcome = self.verifier.verify(&plugin.descriptor).await;
        plugin.descriptor.apply_trust(outcome);

        let id = plugin.id().to_string();
        if let Some(kind) = plugin.descriptor.signature_errors.first().copied() {
            warn!("Plugin {} rejected: {}", id, Error::signature(&id, kind));
            self.diagnostics.write().await.insert(
                id.clone(),
                PluginDiagnostic {
                    plugin_id: id.clone(),
                    plugin_dir: plugin.descriptor.plugin_dir.clone(),
                    signature: plugin.descriptor.signature,
                    errors: plugin.descriptor.signature_errors.clone(),
                },
            );
            return Err(Error::signature(id, kind));
        }

        self.diagnostics.write().await.remove(&id);
        self.register_and_start(plugin).await
    }

    // ========================================================================
    // 등록/해제
    // ========================================================================

    /// 등록하고 managed 플러그인이면 바로 시작
    ///
    /// 시작에 실패해도 등록은 유지됩니다.
    pub async fn register_and_start(&self, plugin: LoadedPlugin) -> Result<()> {
        let entry = RegisteredPlugin::new(plugin.descriptor, plugin.client, self.config.monitor_interval());
        let entry = self.registry.register(entry).await?;

        if entry.is_managed() {
            if let Some(supervisor) = entry.supervisor() {
                supervisor.start_supervised(&self.lifetime).await?;
            }
        }
        Ok(())
    }

    /// 등록 해제 후 클라이언트를 한 번 정지
    pub async fn unregister_and_stop(&self, plugin_id: &str) -> Result<()> {
        let entry = self.registry.unregister(plugin_id).await?;

        if let Some(supervisor) = entry.supervisor() {
            supervisor.decommission().await?;
        }
        info!("Plugin {} unregistered and stopped", plugin_id);
        Ok(())
    }

    /// unmanaged 플러그인 수동 시작 - `token`이 취소되면 정지
    pub async fn start(&self, token: &CancellationToken, plugin_id: &str) -> Result<()> {
        let entry = self
            .registry
            .get(plugin_id)
            .await
            .ok_or_else(|| Error::NotRegistered(plugin_id.to_string()))?;

        let supervisor = entry
            .supervisor()
            .ok_or_else(|| Error::NoClient(plugin_id.to_string()))?;
        if supervisor.is_managed() {
            return Err(Error::AlreadyManaged(plugin_id.to_string()));
        }

        supervisor.start_supervised(token).await
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// `token`이 취소될 때까지 managed 플러그인을 감독
    ///
    /// 취소되면 등록된 모든 클라이언트를 한 번씩 정지하고 `Error::Cancelled`를 돌려줍니다.
    pub async fn run(&self, token: &CancellationToken) -> Result<()> {
        for entry in self.registry.list().await {
            if !entry.is_managed() {
                continue;
            }
            if let Some(supervisor) = entry.supervisor() {
                if let Err(e) = supervisor.ensure_supervised(&self.lifetime).await {
                    error!("Failed to start plugin {}: {}", entry.id(), e);
                }
            }
        }

        token.cancelled().await;
        info!("Plugin run loop cancelled, stopping plugins");
        self.stop_all().await;
        Err(Error::Cancelled)
    }

    /// 등록된 모든 클라이언트를 동시에 정지
    pub async fn stop_all(&self) {
        let entries = self.registry.list().await;
        let stops = entries.iter().filter_map(|entry| {
            entry.supervisor().map(|supervisor| async move {
                if let Err(e) = supervisor.stop().await {
                    warn!("{}", e);
                }
            })
        });
        join_all(stops).await;
    }

    /// 정지 후 monitor 토큰 정리
    pub async fn shutdown(&self) {
        self.stop_all().await;
        self.lifetime.cancel();
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub async fn plugin(&self, plugin_id: &str) -> Option<PluginDescriptor> {
        self.registry
            .get(plugin_id)
            .await
            .map(|entry| entry.descriptor().clone())
    }

    pub async fn plugins(&self) -> Vec<PluginDescriptor> {
        self.registry.descriptors().await
    }

    pub async fn plugins_of_type(&self, plugin_type: PluginType) -> Vec<PluginDescriptor> {
        self.registry.descriptors_of_type(plugin_type).await
    }

    pub async fn routes(&self) -> Vec<PluginRoute> {
        self.registry.routes().await
    }

    pub async fn is_registered(&self, plugin_id: &str) -> bool {
        self.registry.contains(plugin_id).await
    }

    /// 거부된 플러그인 목록
    pub async fn plugin_errors(&self) -> Vec<PluginDiagnostic> {
        self.diagnostics.read().await.values().cloned().collect()
    }

    /// 특정 플러그인의 서명 오류 (거부되지 않았으면 None)
    pub async fn signature_errors(&self, plugin_id: &str) -> Option<Vec<Error>> {
        self.diagnostics
            .read()
            .await
            .get(plugin_id)
            .map(PluginDiagnostic::errors)
    }

    // ========================================================================
    // 설치/제거
    // ========================================================================

    /// 설치 후 플러그인 디렉토리를 다시 로드하여 등록
    pub async fn install(
        &self,
        token: &CancellationToken,
        plugin_id: &str,
        version: &str,
        opts: InstallOpts,
    ) -> Result<()> {
        if let Some(existing) = self.registry.get(plugin_id).await {
            return Err(Error::DuplicatePlugin {
                plugin_id: plugin_id.to_string(),
                existing_dir: existing.descriptor().plugin_dir.clone(),
            });
        }

        let plugins_dir = self
            .config
            .plugins_path
            .clone()
            .ok_or_else(|| Error::Config("plugins path is not configured".to_string()))?;
        let repo_url = opts.repo_url.or_else(|| self.config.repository_url.clone());

        let install = self.installer.install(
            plugin_id,
            version,
            &plugins_dir,
            opts.archive_url.as_deref(),
            repo_url.as_deref(),
        );
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            result = install => result?,
        }

        let loaded = self
            .loader
            .load(std::slice::from_ref(&plugins_dir), &self.registry.ids().await)
            .await?;

        let mut installed = None;
        for plugin in loaded {
            let id = plugin.id().to_string();
            let result = self.admit(plugin).await;
            if id == plugin_id {
                installed = Some(result);
            } else if let Err(e) = result {
                debug!("Plugin {} found during install was not registered: {}", id, e);
            }
        }

        match installed {
            Some(result) => {
                result?;
                info!("Plugin {} v{} installed", plugin_id, version);
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "plugin {} was not found in {:?} after install",
                plugin_id, plugins_dir
            ))),
        }
    }

    /// core/bundled 플러그인은 제거 불가
    pub async fn uninstall(&self, token: &CancellationToken, plugin_id: &str) -> Result<()> {
        let entry = self
            .registry
            .get(plugin_id)
            .await
            .ok_or_else(|| Error::NotInstalled(plugin_id.to_string()))?;

        let descriptor = entry.descriptor();
        if descriptor.is_core() || descriptor.is_bundled() {
            return Err(Error::UninstallCorePlugin(plugin_id.to_string()));
        }
        let plugin_dir = descriptor.plugin_dir.clone();

        // 취소는 해제 전에만 - 해제 이후에는 디스크 제거까지 진행
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let entry = self.registry.unregister(plugin_id).await?;
        if let Some(supervisor) = entry.supervisor() {
            if let Err(e) = supervisor.decommission().await {
                warn!("Continuing uninstall of {} after stop failure: {}", plugin_id, e);
            }
        }

        self.installer.uninstall(&plugin_dir).await?;

        info!("Plugin {} uninstalled", plugin_id);
        Ok(())
    }

    pub async fn update_info(&self, plugin_id: &str, version: &str) -> Result<UpdateInfo> {
        let repo_url = self
            .config
            .repository_url
            .as_deref()
            .ok_or_else(|| Error::Config("plugin repository URL is not configured".to_string()))?;
        self.installer.get_update_info(plugin_id, version, repo_url).await
    }

    // ========================================================================
    // 원격 메서드
    // ========================================================================

    pub async fn collect_metrics(&self, plugin_id: &str) -> Result<CollectMetricsResult> {
        self.dispatcher.collect_metrics(plugin_id).await
    }

    pub async fn check_health(&self, req: CheckHealthRequest) -> Result<CheckHealthResult> {
        self.dispatcher.check_health(req).await
    }

    pub async fn call_resource(
        &self,
        req: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        self.dispatcher.call_resource(req, sender).await
    }

    pub async fn call_resource_http(
        &self,
        plugin_context: PluginContext,
        req: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>> {
        self.dispatcher.call_resource_http(plugin_context, req).await
    }

    pub async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse> {
        self.dispatcher.query_data(req).await
    }

    pub async fn subscribe_stream(&self, req: SubscribeStreamRequest) -> Result<SubscribeStreamResponse> {
        self.dispatcher.subscribe_stream(req).await
    }

    pub async fn publish_stream(&self, req: PublishStreamRequest) -> Result<PublishStreamResponse> {
        self.dispatcher.publish_stream(req).await
    }

    pub async fn run_stream(&self, req: RunStreamRequest, sender: StreamSender) -> Result<()> {
        self.dispatcher.run_stream(req, sender).await
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}
