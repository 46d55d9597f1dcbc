//! Backend RPC payloads
//!
//! 호스트와 백엔드 플러그인 사이를 오가는 요청/응답 타입들.

use plinth_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

// ============================================================================
// PluginContext - 요청마다 전달되는 호출 컨텍스트
// ============================================================================

/// 요청을 보낸 사용자
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RequestUser {
    pub login: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// 앱/데이터소스 인스턴스 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSettings {
    pub id: i64,
    pub uid: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub json_data: serde_json::Value,
    #[serde(default, skip_serializing)]
    pub decrypted_secure_json_data: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PluginContext {
    pub org_id: i64,
    pub plugin_id: String,
    pub user: Option<RequestUser>,
    pub app_instance_settings: Option<InstanceSettings>,
    pub datasource_instance_settings: Option<InstanceSettings>,
}

impl PluginContext {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            ..Default::default()
        }
    }

    pub fn with_org(mut self, org_id: i64) -> Self {
        self.org_id = org_id;
        self
    }

    pub fn with_user(mut self, user: RequestUser) -> Self {
        self.user = Some(user);
        self
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Prometheus text format 메트릭
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CollectMetricsResult {
    pub prometheus_metrics: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CheckHealthRequest {
    pub plugin_context: PluginContext,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    pub message: String,
    pub json_details: Vec<u8>,
}

impl CheckHealthResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.into(),
            json_details: Vec::new(),
        }
    }
}

// ============================================================================
// Resource
// ============================================================================

/// 헤더는 이름당 여러 값을 가질 수 있음
pub type Headers = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CallResourceRequest {
    pub plugin_context: PluginContext,
    /// 플러그인 리소스 경로 (선행 `/` 없음)
    pub path: String,
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl CallResourceRequest {
    /// `http::Request`를 리소스 요청으로 변환
    pub fn from_http(plugin_context: PluginContext, req: &http::Request<Vec<u8>>) -> Self {
        let mut headers = Headers::new();
        for (name, value) in req.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        Self {
            plugin_context,
            path: req.uri().path().trim_start_matches('/').to_string(),
            method: req.method().as_str().to_string(),
            url: req.uri().to_string(),
            headers,
            body: req.body().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallResourceResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Default for CallResourceResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }
}

impl CallResourceResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }
}

// ============================================================================
// Data query
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub from_ms: i64,
    pub to_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataQuery {
    pub ref_id: String,
    pub query_type: String,
    pub max_data_points: i64,
    pub interval_ms: i64,
    pub time_range: TimeRange,
    #[serde(default)]
    pub json: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueryDataRequest {
    pub plugin_context: PluginContext,
    pub headers: HashMap<String, String>,
    pub queries: Vec<DataQuery>,
}

/// 쿼리 하나에 대한 결과
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DataResponse {
    pub frames: Vec<serde_json::Value>,
    pub error: Option<String>,
}

/// `ref_id` 별 결과
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueryDataResponse {
    pub responses: HashMap<String, DataResponse>,
}

// ============================================================================
// Streaming
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    #[default]
    Ok,
    NotFound,
    PermissionDenied,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SubscribeStreamRequest {
    pub plugin_context: PluginContext,
    pub path: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SubscribeStreamResponse {
    pub status: StreamStatus,
    pub initial_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PublishStreamRequest {
    pub plugin_context: PluginContext,
    pub path: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PublishStreamResponse {
    pub status: StreamStatus,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunStreamRequest {
    pub plugin_context: PluginContext,
    pub path: String,
    pub data: Vec<u8>,
}

/// 스트림으로 흘려보내는 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    pub data: Vec<u8>,
}

/// `run_stream` 동안 플러그인이 패킷을 내보내는 채널
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::Sender<StreamPacket>,
}

impl StreamSender {
    /// 송신자와 수신 채널 생성
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamPacket>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.tx
            .send(StreamPacket { data: data.into() })
            .await
            .map_err(|_| Error::Internal("stream receiver closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_resource_from_http() {
        let req = http::Request::builder()
            .method("POST")
            .uri("/api/items?limit=5")
            .header("x-custom", "a")
            .header("x-custom", "b")
            .body(b"payload".to_vec())
            .unwrap();

        let resource = CallResourceRequest::from_http(PluginContext::new("test-app"), &req);
        assert_eq!(resource.path, "api/items");
        assert_eq!(resource.method, "POST");
        assert_eq!(resource.url, "/api/items?limit=5");
        assert_eq!(resource.headers["x-custom"], vec!["a", "b"]);
        assert_eq!(resource.body, b"payload");
    }

    #[tokio::test]
    async fn test_stream_sender() {
        let (sender, mut rx) = StreamSender::channel(4);
        sender.send("tick").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().data, b"tick");

        drop(rx);
        assert!(sender.send("late").await.is_err());
    }
}
