//! Process-backed plugin client
//!
//! 플러그인 실행 파일을 자식 프로세스로 띄우는 [`PluginClient`] 구현.
//! 원격 메서드는 선택적으로 붙인 [`PluginBackend`]로 전달됩니다.

use super::backend::*;
use super::descriptor::PluginDescriptor;
use super::traits::{CallResourceResponseSender, PluginBackend, PluginCapability, PluginClient, PluginFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use plinth_foundation::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

pub struct ProcessClient {
    plugin_id: String,
    executable: PathBuf,
    working_dir: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    managed: bool,
    child: Mutex<Option<Child>>,
    backend: Option<Arc<dyn PluginBackend>>,
}

impl ProcessClient {
    pub fn new(plugin_id: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let working_dir = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            plugin_id: plugin_id.into(),
            executable,
            working_dir,
            args: Vec::new(),
            env: Vec::new(),
            managed: true,
            child: Mutex::new(None),
            backend: None,
        }
    }

    /// `executable` 필드로부터 클라이언트 구성
    pub fn for_descriptor(descriptor: &PluginDescriptor) -> Result<Self> {
        let executable = descriptor.executable.as_deref().ok_or_else(|| {
            Error::InvalidInput(format!("backend plugin '{}' has no executable", descriptor.id))
        })?;

        let mut path = descriptor.plugin_dir.join(executable);
        if !path.exists() {
            // 플랫폼 접미사가 붙은 바이너리 (예: gpx_app_linux_amd64)
            let suffixed = descriptor.plugin_dir.join(format!(
                "{}_{}_{}",
                executable,
                std::env::consts::OS,
                go_arch(std::env::consts::ARCH)
            ));
            if suffixed.exists() {
                path = suffixed;
            }
        }

        Ok(Self::new(&descriptor.id, path).with_working_dir(&descriptor.plugin_dir))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn unmanaged(mut self) -> Self {
        self.managed = false;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn PluginBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().and_then(|c| c.id())
    }

    fn backend(&self) -> Result<&Arc<dyn PluginBackend>> {
        self.backend.as_ref().ok_or(Error::MethodNotImplemented)
    }
}

fn go_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// 실행 파일 기반 클라이언트 팩토리 - 라이선스 환경 변수를 주입
pub fn process_factory(env: Vec<(String, String)>) -> PluginFactory {
    Arc::new(move |descriptor: &PluginDescriptor| {
        let mut client = ProcessClient::for_descriptor(descriptor)?;
        for (key, value) in &env {
            client = client.with_env(key, value);
        }
        Ok(Arc::new(client) as Arc<dyn PluginClient>)
    })
}

#[async_trait]
impl PluginClient for ProcessClient {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn is_managed(&self) -> bool {
        self.managed
    }

    async fn start(&self) -> Result<()> {
        let mut child = self.child.lock();
        if let Some(running) = child.as_mut() {
            if matches!(running.try_wait(), Ok(None)) {
                return Ok(());
            }
        }

        let spawned = Command::new(&self.executable)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::plugin_start(&self.plugin_id, format!("{}: {}", self.executable.display(), e)))?;

        info!("Spawned plugin process {} (pid {:?})", self.plugin_id, spawned.id());
        *child = Some(spawned);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let child = self.child.lock().take();
        let Some(mut child) = child else {
            debug!("Plugin process {} is not running", self.plugin_id);
            return Ok(());
        };

        if let Err(e) = child.kill().await {
            // 이미 종료된 프로세스
            warn!("Failed to kill plugin process {}: {}", self.plugin_id, e);
        }
        Ok(())
    }

    fn exited(&self) -> bool {
        match self.child.lock().as_mut() {
            None => true,
            Some(child) => !matches!(child.try_wait(), Ok(None)),
        }
    }
}

#[async_trait]
impl PluginBackend for ProcessClient {
    fn capabilities(&self) -> Vec<PluginCapability> {
        self.backend.as_ref().map(|b| b.capabilities()).unwrap_or_default()
    }

    async fn collect_metrics(&self) -> Result<CollectMetricsResult> {
        self.backend()?.collect_metrics().await
    }

    async fn check_health(&self, req: CheckHealthRequest) -> Result<CheckHealthResult> {
        self.backend()?.check_health(req).await
    }

    async fn call_resource(&self, req: CallResourceRequest, sender: &dyn CallResourceResponseSender) -> Result<()> {
        self.backend()?.call_resource(req, sender).await
    }

    async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse> {
        self.backend()?.query_data(req).await
    }

    async fn subscribe_stream(&self, req: SubscribeStreamRequest) -> Result<SubscribeStreamResponse> {
        self.backend()?.subscribe_stream(req).await
    }

    async fn publish_stream(&self, req: PublishStreamRequest) -> Result<PublishStreamResponse> {
        self.backend()?.publish_stream(req).await
    }

    async fn run_stream(&self, req: RunStreamRequest, sender: StreamSender) -> Result<()> {
        self.backend()?.run_stream(req, sender).await
    }
}
