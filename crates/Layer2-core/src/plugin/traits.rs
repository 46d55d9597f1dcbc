//! Plugin traits - 핵심 플러그인 인터페이스

use super::backend::*;
use super::descriptor::PluginDescriptor;
use async_trait::async_trait;
use plinth_foundation::{Error, Result};
use std::sync::Arc;

// ============================================================================
// PluginCapability - 플러그인 기능 열거
// ============================================================================

/// 백엔드 클라이언트가 구현할 수 있는 원격 메서드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginCapability {
    CollectMetrics,
    CheckHealth,
    CallResource,
    QueryData,
    SubscribeStream,
    PublishStream,
    RunStream,
}

impl PluginCapability {
    pub fn all() -> &'static [PluginCapability] {
        &[
            PluginCapability::CollectMetrics,
            PluginCapability::CheckHealth,
            PluginCapability::CallResource,
            PluginCapability::QueryData,
            PluginCapability::SubscribeStream,
            PluginCapability::PublishStream,
            PluginCapability::RunStream,
        ]
    }
}

// ============================================================================
// PluginBackend - 원격 메서드
// ============================================================================

/// 백엔드 플러그인이 처리하는 요청들
///
/// 구현하지 않은 메서드는 `Error::MethodNotImplemented`를 돌려줍니다.
/// 호스트는 `capabilities()`에 없는 메서드를 호출하지 않습니다.
#[async_trait]
pub trait PluginBackend: Send + Sync {
    /// 구현된 원격 메서드 목록
    fn capabilities(&self) -> Vec<PluginCapability> {
        vec![]
    }

    fn has_capability(&self, capability: PluginCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    async fn collect_metrics(&self) -> Result<CollectMetricsResult> {
        Err(Error::MethodNotImplemented)
    }

    async fn check_health(&self, _req: CheckHealthRequest) -> Result<CheckHealthResult> {
        Err(Error::MethodNotImplemented)
    }

    /// 응답은 `sender`로 한 번 이상 흘려보냄 (첫 응답이 status/headers 결정)
    async fn call_resource(
        &self,
        _req: CallResourceRequest,
        _sender: &dyn CallResourceResponseSender,
    ) -> Result<()> {
        Err(Error::MethodNotImplemented)
    }

    async fn query_data(&self, _req: QueryDataRequest) -> Result<QueryDataResponse> {
        Err(Error::MethodNotImplemented)
    }

    async fn subscribe_stream(&self, _req: SubscribeStreamRequest) -> Result<SubscribeStreamResponse> {
        Err(Error::MethodNotImplemented)
    }

    async fn publish_stream(&self, _req: PublishStreamRequest) -> Result<PublishStreamResponse> {
        Err(Error::MethodNotImplemented)
    }

    async fn run_stream(&self, _req: RunStreamRequest, _sender: StreamSender) -> Result<()> {
        Err(Error::MethodNotImplemented)
    }
}

// ============================================================================
// PluginClient - 프로세스 라이프사이클
// ============================================================================

/// 백엔드 플러그인 하나에 대한 핸들
///
/// managed 플러그인은 등록 즉시 시작되고 run loop가 감시합니다.
/// unmanaged 플러그인은 `PluginManager::start`로 직접 시작해야 합니다.
#[async_trait]
pub trait PluginClient: PluginBackend {
    fn plugin_id(&self) -> &str;

    fn is_managed(&self) -> bool {
        true
    }

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// 프로세스가 종료되었는지 (시작 전에도 true)
    fn exited(&self) -> bool;
}

/// resource 응답 스트림 수신자
#[async_trait]
pub trait CallResourceResponseSender: Send + Sync {
    async fn send(&self, response: CallResourceResponse) -> Result<()>;
}

/// 백엔드 플러그인용 클라이언트 생성 함수
pub type PluginFactory = Arc<dyn Fn(&PluginDescriptor) -> Result<Arc<dyn PluginClient>> + Send + Sync>;

// ============================================================================
// 외부 서비스
// ============================================================================

/// 라이선스 정보 - 읽기 전용, 플러그인 프로세스 환경 변수로 전달됨
pub trait Licensing: Send + Sync {
    fn edition(&self) -> String;

    fn has_license(&self) -> bool {
        false
    }

    fn has_valid_license(&self) -> bool {
        false
    }

    /// 만료 시각 (unix seconds, 없으면 0)
    fn expiry(&self) -> i64 {
        0
    }

    fn state_info(&self) -> String {
        String::new()
    }

    fn content_delivery_prefix(&self) -> String {
        String::new()
    }

    fn license_url(&self, _show_admin_page: bool) -> String {
        String::new()
    }

    fn token(&self) -> Option<String> {
        None
    }

    /// 플러그인 프로세스에 넘겨줄 환경 변수
    fn environment(&self) -> Vec<(String, String)> {
        let mut env = vec![("PLINTH_LICENSE_EDITION".to_string(), self.edition())];
        if let Some(token) = self.token() {
            env.push(("PLINTH_LICENSE_TOKEN".to_string(), token));
        }
        env
    }
}

/// 오픈소스 에디션 (라이선스 없음)
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSourceLicensing;

impl Licensing for OpenSourceLicensing {
    fn edition(&self) -> String {
        "Open Source".to_string()
    }
}

/// resource 요청 사전 검증
#[async_trait]
pub trait RequestValidator: Send + Sync {
    async fn validate(&self, plugin_id: &str, req: &http::Request<Vec<u8>>) -> Result<()>;
}

/// 모든 요청 허용
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllValidator;

#[async_trait]
impl RequestValidator for AllowAllValidator {
    async fn validate(&self, _plugin_id: &str, _req: &http::Request<Vec<u8>>) -> Result<()> {
        Ok(())
    }
}
