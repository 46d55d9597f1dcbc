//! Request dispatch
//!
//! 플러그인 ID로 등록된 클라이언트를 찾아 원격 메서드를 전달합니다.
//! 확인 순서: 등록 여부 -> 클라이언트 존재 -> capability.

use super::backend::*;
use super::registry::PluginRegistry;
use super::traits::{CallResourceResponseSender, PluginCapability, PluginClient, RequestValidator};
use async_trait::async_trait;
use parking_lot::Mutex;
use plinth_foundation::{Error, Result};
use std::sync::Arc;
use tracing::debug;

pub struct PluginDispatcher {
    registry: Arc<PluginRegistry>,
    validator: Arc<dyn RequestValidator>,
}

impl PluginDispatcher {
    pub fn new(registry: Arc<PluginRegistry>, validator: Arc<dyn RequestValidator>) -> Self {
        Self { registry, validator }
    }

    async fn client_for(&self, plugin_id: &str, capability: PluginCapability) -> Result<Arc<dyn PluginClient>> {
        let plugin = self
            .registry
            .get(plugin_id)
            .await
            .ok_or_else(|| Error::NotRegistered(plugin_id.to_string()))?;

        let client = plugin
            .client()
            .cloned()
            .ok_or_else(|| Error::NoClient(plugin_id.to_string()))?;

        if !client.has_capability(capability) {
            debug!("Plugin {} does not implement {:?}", plugin_id, capability);
            return Err(Error::MethodNotImplemented);
        }
        Ok(client)
    }

    pub async fn collect_metrics(&self, plugin_id: &str) -> Result<CollectMetricsResult> {
        let client = self.client_for(plugin_id, PluginCapability::CollectMetrics).await?;
        client.collect_metrics().await
    }

    pub async fn check_health(&self, req: CheckHealthRequest) -> Result<CheckHealthResult> {
        let client = self
            .client_for(&req.plugin_context.plugin_id, PluginCapability::CheckHealth)
            .await?;
        client.check_health(req).await
    }

    pub async fn call_resource(
        &self,
        req: CallResourceRequest,
        sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        let client = self
            .client_for(&req.plugin_context.plugin_id, PluginCapability::CallResource)
            .await?;
        client.call_resource(req, sender).await
    }

    /// HTTP 어댑터 - 검증 후 스트림 응답을 하나의 `http::Response`로 모음
    pub async fn call_resource_http(
        &self,
        plugin_context: PluginContext,
        req: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>> {
        self.validator.validate(&plugin_context.plugin_id, &req).await?;

        let client = self
            .client_for(&plugin_context.plugin_id, PluginCapability::CallResource)
            .await?;

        let collector = ResponseCollector::default();
        client
            .call_resource(CallResourceRequest::from_http(plugin_context, &req), &collector)
            .await?;
        collector.into_response()
    }

    pub async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse> {
        let client = self
            .client_for(&req.plugin_context.plugin_id, PluginCapability::QueryData)
            .await?;
        client.query_data(req).await
    }

    pub async fn subscribe_stream(&self, req: SubscribeStreamRequest) -> Result<SubscribeStreamResponse> {
        let client = self
            .client_for(&req.plugin_context.plugin_id, PluginCapability::SubscribeStream)
            .await?;
        client.subscribe_stream(req).await
    }

    pub async fn publish_stream(&self, req: PublishStreamRequest) -> Result<PublishStreamResponse> {
        let client = self
            .client_for(&req.plugin_context.plugin_id, PluginCapability::PublishStream)
            .await?;
        client.publish_stream(req).await
    }

    pub async fn run_stream(&self, req: RunStreamRequest, sender: StreamSender) -> Result<()> {
        let client = self
            .client_for(&req.plugin_context.plugin_id, PluginCapability::RunStream)
            .await?;
        client.run_stream(req, sender).await
    }
}

// ============================================================================
// ResponseCollector
// ============================================================================

/// 첫 응답의 status/headers, 이후 응답은 body만 이어붙임
#[derive(Default)]
struct ResponseCollector {
    response: Mutex<Option<CallResourceResponse>>,
}

#[async_trait]
impl CallResourceResponseSender for ResponseCollector {
    async fn send(&self, response: CallResourceResponse) -> Result<()> {
        let mut slot = self.response.lock();
        match slot.as_mut() {
            Some(existing) => existing.body.extend_from_slice(&response.body),
            None => *slot = Some(response),
        }
        Ok(())
    }
}

impl ResponseCollector {
    fn into_response(self) -> Result<http::Response<Vec<u8>>> {
        let response = self
            .response
            .into_inner()
            .ok_or_else(|| Error::Internal("received empty resource response".to_string()))?;

        let mut builder = http::Response::builder().status(response.status);
        for (name, values) in &response.headers {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        builder
            .body(response.body)
            .map_err(|e| Error::Http(e.to_string()))
    }
}
