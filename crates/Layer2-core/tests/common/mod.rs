//! Shared fixtures for manager integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::RwLock;
use plinth_core::plugin::{
    CallResourceRequest, CallResourceResponse, CallResourceResponseSender, CheckHealthRequest,
    CheckHealthResult, CollectMetricsResult, QueryDataRequest, QueryDataResponse,
};
use plinth_core::{Error, PluginBackend, PluginCapability, PluginClient, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// 호출 횟수를 세는 테스트용 클라이언트
pub struct TestClient {
    id: String,
    managed: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    exited: AtomicBool,
    fail_stop: AtomicBool,
    metrics: RwLock<Option<CollectMetricsResult>>,
    health: RwLock<Option<CheckHealthResult>>,
    resource: RwLock<Option<CallResourceResponse>>,
    query: RwLock<Option<QueryDataResponse>>,
}

impl TestClient {
    pub fn new(id: &str, managed: bool) -> Self {
        Self {
            id: id.to_string(),
            managed,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            exited: AtomicBool::new(true),
            fail_stop: AtomicBool::new(false),
            metrics: RwLock::new(None),
            health: RwLock::new(None),
            resource: RwLock::new(None),
            query: RwLock::new(None),
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.starts.store(0, Ordering::SeqCst);
        self.stops.store(0, Ordering::SeqCst);
    }

    /// 프로세스가 예기치 않게 종료된 것처럼
    pub fn kill(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    /// 이후 stop 호출이 실패하도록
    pub fn fail_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }

    pub fn handle_metrics(&self, result: CollectMetricsResult) {
        *self.metrics.write() = Some(result);
    }

    pub fn handle_health(&self, result: CheckHealthResult) {
        *self.health.write() = Some(result);
    }

    pub fn handle_resource(&self, response: CallResourceResponse) {
        *self.resource.write() = Some(response);
    }

    pub fn handle_query(&self, response: QueryDataResponse) {
        *self.query.write() = Some(response);
    }
}

#[async_trait]
impl PluginBackend for TestClient {
    fn capabilities(&self) -> Vec<PluginCapability> {
        let mut caps = Vec::new();
        if self.metrics.read().is_some() {
            caps.push(PluginCapability::CollectMetrics);
        }
        if self.health.read().is_some() {
            caps.push(PluginCapability::CheckHealth);
        }
        if self.resource.read().is_some() {
            caps.push(PluginCapability::CallResource);
        }
        if self.query.read().is_some() {
            caps.push(PluginCapability::QueryData);
        }
        caps
    }

    async fn collect_metrics(&self) -> Result<CollectMetricsResult> {
        self.metrics.read().clone().ok_or(Error::MethodNotImplemented)
    }

    async fn check_health(&self, _req: CheckHealthRequest) -> Result<CheckHealthResult> {
        self.health.read().clone().ok_or(Error::MethodNotImplemented)
    }

    async fn call_resource(
        &self,
        _req: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        let response = self.resource.read().clone().ok_or(Error::MethodNotImplemented)?;
        sender.send(response).await
    }

    async fn query_data(&self, _req: QueryDataRequest) -> Result<QueryDataResponse> {
        self.query.read().clone().ok_or(Error::MethodNotImplemented)
    }
}

#[async_trait]
impl PluginClient for TestClient {
    fn plugin_id(&self) -> &str {
        &self.id
    }

    fn is_managed(&self) -> bool {
        self.managed
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.exited.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::Internal("stop failed".to_string()));
        }
        self.exited.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

/// 조건이 참이 될 때까지 대기 (최대 2초)
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn write_plugin_json(dir: &Path, id: &str, plugin_type: &str, backend: bool) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("plugin.json"),
        format!(
            r#"{{"id": "{id}", "type": "{plugin_type}", "name": "{id}", "backend": {backend}, "executable": "gpx_{id}", "info": {{"version": "1.0.0"}}}}"#
        ),
    )
    .unwrap();
}
