//! Process supervision
//!
//! 등록된 백엔드 플러그인 하나당 [`Supervisor`] 하나가 붙습니다.
//! start/stop은 lifecycle lock으로 직렬화되고, 시작된 프로세스는
//! 취소 토큰이 살아있는 동안 monitor task가 주기적으로 확인하여
//! 예기치 않게 종료되면 다시 시작합니다.

use super::traits::PluginClient;
use plinth_foundation::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 프로세스 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    /// 실행 중이어야 하는데 프로세스가 종료됨
    Exited,
    Stopping,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited => write!(f, "exited"),
            ProcessState::Stopping => write!(f, "stopping"),
        }
    }
}

struct Lifecycle {
    state: ProcessState,
    /// 현재 monitor의 토큰
    monitor: Option<CancellationToken>,
    /// monitor 세대 - 교체된 monitor는 스스로 종료
    generation: u64,
    /// 아직 정지가 필요한지 - 시작한 적 없는 클라이언트도 한 번은 정지
    stop_owed: bool,
}

/// 플러그인 프로세스 감독자
pub struct Supervisor {
    plugin_id: String,
    client: Arc<dyn PluginClient>,
    lifecycle: Mutex<Lifecycle>,
    decommissioned: AtomicBool,
    restarts: AtomicU64,
    monitor_interval: Duration,
}

impl Supervisor {
    pub fn new(client: Arc<dyn PluginClient>, monitor_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            plugin_id: client.plugin_id().to_string(),
            client,
            lifecycle: Mutex::new(Lifecycle {
                state: ProcessState::Stopped,
                monitor: None,
                generation: 0,
                stop_owed: true,
            }),
            decommissioned: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
            monitor_interval,
        })
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn client(&self) -> &Arc<dyn PluginClient> {
        &self.client
    }

    pub fn is_managed(&self) -> bool {
        self.client.is_managed()
    }

    /// 자동 재시작 횟수
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> ProcessState {
        let lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            ProcessState::Running if self.client.exited() => ProcessState::Exited,
            state => state,
        }
    }

    /// 살아있는 monitor가 붙어 있는지
    pub async fn is_supervised(&self) -> bool {
        let lifecycle = self.lifecycle.lock().await;
        lifecycle.monitor.as_ref().is_some_and(|m| !m.is_cancelled())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// 프로세스를 시작하고 `token` 하위에 monitor를 붙임
    ///
    /// 이미 monitor가 있으면 교체됩니다.
    pub async fn start_supervised(self: &Arc<Self>, token: &CancellationToken) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.start_locked(&mut lifecycle, token).await
    }

    /// monitor가 없을 때만 시작 (run loop 용)
    pub async fn ensure_supervised(self: &Arc<Self>, token: &CancellationToken) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.monitor.as_ref().is_some_and(|m| !m.is_cancelled()) {
            return Ok(());
        }
        self.start_locked(&mut lifecycle, token).await
    }

    async fn start_locked(self: &Arc<Self>, lifecycle: &mut Lifecycle, token: &CancellationToken) -> Result<()> {
        if self.is_decommissioned() {
            return Err(Error::NotRegistered(self.plugin_id.clone()));
        }

        lifecycle.state = ProcessState::Starting;
        if let Err(e) = self.client.start().await {
            lifecycle.state = ProcessState::Stopped;
            error!("Failed to start plugin {}: {}", self.plugin_id, e);
            return Err(into_start_error(&self.plugin_id, e));
        }
        lifecycle.state = ProcessState::Running;
        lifecycle.stop_owed = true;

        if let Some(previous) = lifecycle.monitor.take() {
            previous.cancel();
        }
        let monitor = token.child_token();
        lifecycle.generation += 1;
        lifecycle.monitor = Some(monitor.clone());

        tokio::spawn(Arc::clone(self).monitor(monitor, lifecycle.generation));
        info!("Started plugin: {}", self.plugin_id);
        Ok(())
    }

    /// monitor를 떼고 프로세스를 한 번 정지
    ///
    /// 마지막 시작 이후 이미 정지했다면 클라이언트를 다시 호출하지 않습니다.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        if let Some(monitor) = lifecycle.monitor.take() {
            monitor.cancel();
        }
        if !lifecycle.stop_owed {
            debug!("Plugin {} already stopped", self.plugin_id);
            return Ok(());
        }

        lifecycle.state = ProcessState::Stopping;
        let result = self.client.stop().await;
        lifecycle.state = ProcessState::Stopped;
        lifecycle.stop_owed = false;

        match result {
            Ok(()) => {
                debug!("Stopped plugin: {}", self.plugin_id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to stop plugin {}: {}", self.plugin_id, e);
                Err(Error::plugin_stop(&self.plugin_id, e))
            }
        }
    }

    /// 등록 해제 - 이후 재시작 금지, 정지 한 번
    pub async fn decommission(&self) -> Result<()> {
        self.decommissioned.store(true, Ordering::SeqCst);
        self.stop().await
    }

    // ========================================================================
    // Monitor
    // ========================================================================

    async fn monitor(self: Arc<Self>, token: CancellationToken, generation: u64) {
        debug!("Monitoring plugin {} every {:?}", self.plugin_id, self.monitor_interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.on_cancelled(generation).await;
                    break;
                }
                _ = tokio::time::sleep(self.monitor_interval) => {}
            }

            if self.is_decommissioned() {
                break;
            }
            if !self.client.exited() {
                continue;
            }

            let mut lifecycle = self.lifecycle.lock().await;
            // stop이나 교체가 먼저 lock을 잡았을 수 있음
            if token.is_cancelled() || lifecycle.generation != generation || self.is_decommissioned() {
                drop(lifecycle);
                if token.is_cancelled() {
                    self.on_cancelled(generation).await;
                }
                break;
            }

            warn!("Plugin {} exited unexpectedly, restarting", self.plugin_id);
            lifecycle.state = ProcessState::Exited;
            match self.client.start().await {
                Ok(()) => {
                    lifecycle.state = ProcessState::Running;
                    lifecycle.stop_owed = true;
                    self.restarts.fetch_add(1, Ordering::SeqCst);
                    info!("Restarted plugin: {}", self.plugin_id);
                }
                Err(e) => {
                    // 다음 주기에 재시도
                    error!("Failed to restart plugin {}: {}", self.plugin_id, e);
                }
            }
        }

        debug!("Stopped monitoring plugin {}", self.plugin_id);
    }

    /// 토큰 취소 시 - 아직 현재 monitor라면 정지 책임을 짐
    async fn on_cancelled(&self, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.generation != generation || lifecycle.monitor.is_none() {
            return;
        }
        let _ = self.stop_locked(&mut lifecycle).await;
    }
}

fn into_start_error(plugin_id: &str, e: Error) -> Error {
    match e {
        e @ Error::PluginStart { .. } => e,
        other => Error::plugin_start(plugin_id, other),
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("plugin_id", &self.plugin_id)
            .field("managed", &self.is_managed())
            .field("decommissioned", &self.is_decommissioned())
            .field("restarts", &self.restart_count())
            .finish()
    }
}
