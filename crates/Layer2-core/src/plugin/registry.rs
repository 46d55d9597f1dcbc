//! Plugin Registry - 플러그인 저장소
//!
//! ID별 등록 정보와 백엔드 라우트 테이블을 하나의 lock 아래에서 관리하여
//! 두 뷰가 항상 일치하도록 합니다.

use super::descriptor::{PluginDescriptor, PluginRoute, PluginType};
use super::supervisor::Supervisor;
use super::traits::PluginClient;
use plinth_foundation::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 등록된 플러그인 하나
#[derive(Debug)]
pub struct RegisteredPlugin {
    descriptor: PluginDescriptor,
    /// 클라이언트가 있는 경우에만 존재
    supervisor: Option<Arc<Supervisor>>,
    /// 등록 순서
    load_order: usize,
}

impl RegisteredPlugin {
    pub fn new(descriptor: PluginDescriptor, client: Option<Arc<dyn PluginClient>>, monitor_interval: Duration) -> Self {
        Self {
            descriptor,
            supervisor: client.map(|client| Supervisor::new(client, monitor_interval)),
            load_order: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn supervisor(&self) -> Option<&Arc<Supervisor>> {
        self.supervisor.as_ref()
    }

    pub fn client(&self) -> Option<&Arc<dyn PluginClient>> {
        self.supervisor.as_ref().map(|s| s.client())
    }

    pub fn is_managed(&self) -> bool {
        self.supervisor.as_ref().is_some_and(|s| s.is_managed())
    }

    pub fn load_order(&self) -> usize {
        self.load_order
    }

    fn route(&self) -> Option<PluginRoute> {
        self.descriptor.backend.then(|| PluginRoute {
            plugin_id: self.descriptor.id.clone(),
            directory: self.descriptor.plugin_dir.clone(),
        })
    }
}

#[derive(Default)]
struct RegistryState {
    plugins: HashMap<String, Arc<RegisteredPlugin>>,
    /// 백엔드 플러그인 라우트 (ID 순)
    routes: BTreeMap<String, PluginRoute>,
    load_counter: usize,
}

/// 플러그인 레지스트리
#[derive(Default)]
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 플러그인 등록 - 같은 ID가 이미 있으면 `DuplicatePlugin`
    pub async fn register(&self, mut plugin: RegisteredPlugin) -> Result<Arc<RegisteredPlugin>> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.plugins.get(plugin.id()) {
            return Err(Error::DuplicatePlugin {
                plugin_id: plugin.id().to_string(),
                existing_dir: existing.descriptor.plugin_dir.clone(),
            });
        }

        state.load_counter += 1;
        plugin.load_order = state.load_counter;

        let plugin = Arc::new(plugin);
        if let Some(route) = plugin.route() {
            state.routes.insert(route.plugin_id.clone(), route);
        }
        state.plugins.insert(plugin.id().to_string(), Arc::clone(&plugin));

        info!("Registered plugin: {} (v{})", plugin.id(), plugin.descriptor.version());
        Ok(plugin)
    }

    /// 등록 해제 - 라우트도 함께 제거
    pub async fn unregister(&self, id: &str) -> Result<Arc<RegisteredPlugin>> {
        let mut state = self.state.write().await;

        let plugin = state
            .plugins
            .remove(id)
            .ok_or_else(|| Error::NotRegistered(id.to_string()))?;
        state.routes.remove(id);

        info!("Unregistered plugin: {}", id);
        Ok(plugin)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<RegisteredPlugin>> {
        self.state.read().await.plugins.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.plugins.contains_key(id)
    }

    /// 등록 순서대로
    pub async fn list(&self) -> Vec<Arc<RegisteredPlugin>> {
        let state = self.state.read().await;
        let mut plugins: Vec<_> = state.plugins.values().cloned().collect();
        plugins.sort_by_key(|p| p.load_order);
        plugins
    }

    pub async fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.list().await.iter().map(|p| p.descriptor.clone()).collect()
    }

    pub async fn descriptors_of_type(&self, plugin_type: PluginType) -> Vec<PluginDescriptor> {
        self.list()
            .await
            .iter()
            .filter(|p| p.descriptor.plugin_type == plugin_type)
            .map(|p| p.descriptor.clone())
            .collect()
    }

    pub async fn routes(&self) -> Vec<PluginRoute> {
        self.state.read().await.routes.values().cloned().collect()
    }

    pub async fn ids(&self) -> HashSet<String> {
        self.state.read().await.plugins.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.plugins.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 모든 플러그인 제거 (정지는 호출자 책임)
    pub async fn clear(&self) -> Vec<Arc<RegisteredPlugin>> {
        let mut state = self.state.write().await;
        state.routes.clear();
        let drained: Vec<_> = state.plugins.drain().map(|(_, p)| p).collect();
        debug!("Cleared {} plugins from registry", drained.len());
        drained
    }
}
