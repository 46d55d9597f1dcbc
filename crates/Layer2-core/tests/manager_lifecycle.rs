//! Registration, supervision and dispatch through the manager

mod common;

use common::{wait_until, TestClient};
use plinth_core::plugin::{
    CallResourceResponse, CheckHealthRequest, CheckHealthResult, CollectMetricsResult, HealthStatus,
    PluginContext, QueryDataRequest, QueryDataResponse,
};
use plinth_core::{
    ArchiveInstaller, Error, FsLoader, LoadedPlugin, PluginClient, PluginDescriptor, PluginManager,
    PluginType,
};
use plinth_foundation::HostConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn test_manager() -> PluginManager {
    let config = HostConfig::default().with_monitor_interval(Duration::from_millis(10));
    PluginManager::new(config, Arc::new(FsLoader::new()), Arc::new(ArchiveInstaller::new()))
}

fn backend_plugin(client: &Arc<TestClient>) -> LoadedPlugin {
    let descriptor = PluginDescriptor::new("test-plugin", PluginType::Datasource, "/plugins/test-plugin")
        .with_backend(Some("gpx_test".to_string()));
    LoadedPlugin::new(descriptor).with_client(client.clone())
}

/// run을 띄우고 잠시 후 취소, 결과 반환
async fn run_then_cancel(manager: &Arc<PluginManager>, during: impl std::future::Future<Output = ()>) -> Error {
    let token = CancellationToken::new();
    let handle = {
        let manager = Arc::clone(manager);
        let token = token.clone();
        tokio::spawn(async move { manager.run(&token).await })
    };

    during.await;
    token.cancel();
    handle.await.unwrap().unwrap_err()
}

#[tokio::test]
async fn test_managed_plugin_lifecycle() {
    let manager = Arc::new(test_manager());
    let client = Arc::new(TestClient::new("test-plugin", true));

    // 등록 즉시 시작
    manager.register_and_start(backend_plugin(&client)).await.unwrap();
    assert_eq!(client.starts(), 1);
    assert!(!client.exited());
    let plugin = manager.plugin("test-plugin").await.unwrap();
    assert_eq!(plugin.id, "test-plugin");
    assert_eq!(manager.routes().await.len(), 1);

    // 중복 등록은 실패하고 시작하지 않음
    let err = manager.register_and_start(backend_plugin(&client)).await.unwrap_err();
    assert!(matches!(err, Error::DuplicatePlugin { .. }));
    assert_eq!(client.starts(), 1);

    // 취소되면 정확히 한 번 정지
    let err = run_then_cancel(&manager, tokio::time::sleep(Duration::from_millis(20))).await;
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(client.starts(), 1);
    assert_eq!(client.stops(), 1);
    assert!(client.exited());

    // managed 플러그인은 수동 시작 불가
    let err = manager.start(&CancellationToken::new(), "test-plugin").await.unwrap_err();
    assert!(matches!(err, Error::AlreadyManaged(_)));
}

#[tokio::test]
async fn test_managed_plugin_restarts_when_killed() {
    let manager = Arc::new(test_manager());
    let client = Arc::new(TestClient::new("test-plugin", true));
    manager.register_and_start(backend_plugin(&client)).await.unwrap();
    assert_eq!(client.starts(), 1);

    let killer = client.clone();
    let err = run_then_cancel(&manager, async move {
        killer.kill();
        wait_until(|| killer.starts() == 2 && !killer.exited()).await;
    })
    .await;

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(client.starts(), 2);
    assert_eq!(client.stops(), 1);
}

#[tokio::test]
async fn test_run_restarts_stopped_managed_plugin() {
    let manager = Arc::new(test_manager());
    let client = Arc::new(TestClient::new("test-plugin", true));
    manager.register_and_start(backend_plugin(&client)).await.unwrap();

    run_then_cancel(&manager, tokio::time::sleep(Duration::from_millis(10))).await;
    client.reset();

    // 이전 run에서 정지됐으므로 다음 run이 다시 감독을 시작
    let watcher = client.clone();
    run_then_cancel(&manager, async move {
        wait_until(|| watcher.starts() == 1).await;
    })
    .await;
    assert_eq!(client.starts(), 1);
    assert_eq!(client.stops(), 1);
}

#[tokio::test]
async fn test_dispatch_unimplemented_methods() {
    let manager = test_manager();
    let client = Arc::new(TestClient::new("test-plugin", true));
    manager.register_and_start(backend_plugin(&client)).await.unwrap();

    let err = manager.collect_metrics("test-plugin").await.unwrap_err();
    assert!(matches!(err, Error::MethodNotImplemented));

    let req = CheckHealthRequest {
        plugin_context: PluginContext::new("test-plugin"),
    };
    assert!(matches!(manager.check_health(req).await, Err(Error::MethodNotImplemented)));

    let http_req = http::Request::builder().uri("/resource").body(Vec::new()).unwrap();
    let result = manager.call_resource_http(PluginContext::new("test-plugin"), http_req).await;
    assert!(matches!(result, Err(Error::MethodNotImplemented)));

    let result = manager.collect_metrics("unknown-plugin").await;
    assert!(matches!(result, Err(Error::NotRegistered(_))));
}

#[tokio::test]
async fn test_dispatch_implemented_methods() {
    let manager = test_manager();
    let client = Arc::new(TestClient::new("test-plugin", true));
    manager.register_and_start(backend_plugin(&client)).await.unwrap();

    client.handle_metrics(CollectMetricsResult {
        prometheus_metrics: b"hello".to_vec(),
    });
    client.handle_health(CheckHealthResult::ok("All good"));
    client.handle_resource(CallResourceResponse::new(200, "resource").with_header("x-plugin", "test"));
    let mut query = QueryDataResponse::default();
    query.responses.insert("A".to_string(), Default::default());
    client.handle_query(query);

    let metrics = manager.collect_metrics("test-plugin").await.unwrap();
    assert_eq!(metrics.prometheus_metrics, b"hello");

    let health = manager
        .check_health(CheckHealthRequest {
            plugin_context: PluginContext::new("test-plugin"),
        })
        .await
        .unwrap();
    assert_eq!(health.status, HealthStatus::Ok);
    assert_eq!(health.message, "All good");

    let http_req = http::Request::builder().uri("/resource").body(Vec::new()).unwrap();
    let response = manager
        .call_resource_http(PluginContext::new("test-plugin"), http_req)
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(response.headers()["x-plugin"], "test");
    assert_eq!(response.body(), b"resource");

    let result = manager
        .query_data(QueryDataRequest {
            plugin_context: PluginContext::new("test-plugin"),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(result.responses.contains_key("A"));
}

#[tokio::test]
async fn test_unregister_stops_once() {
    let manager = test_manager();
    let client = Arc::new(TestClient::new("test-plugin", true));
    manager.register_and_start(backend_plugin(&client)).await.unwrap();

    manager.unregister_and_stop("test-plugin").await.unwrap();
    assert_eq!(client.stops(), 1);
    assert!(manager.plugin("test-plugin").await.is_none());
    assert!(manager.routes().await.is_empty());

    let err = manager.start(&CancellationToken::new(), "test-plugin").await.unwrap_err();
    assert!(matches!(err, Error::NotRegistered(_)));
    let err = manager.unregister_and_stop("test-plugin").await.unwrap_err();
    assert!(matches!(err, Error::NotRegistered(_)));

    // 해제 후에는 종료 상태여도 재시작하지 않음
    client.kill();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(client.starts(), 1);
}

#[tokio::test]
async fn test_unmanaged_plugin_lifecycle() {
    let manager = Arc::new(test_manager());
    let client = Arc::new(TestClient::new("test-plugin", false));

    // 등록만 하고 시작하지 않음
    manager.register_and_start(backend_plugin(&client)).await.unwrap();
    assert_eq!(client.starts(), 0);
    assert!(manager.is_registered("test-plugin").await);

    // 시작한 적 없어도 취소 시 한 번 정지
    let err = run_then_cancel(&manager, tokio::time::sleep(Duration::from_millis(20))).await;
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(client.starts(), 0);
    assert_eq!(client.stops(), 1);
    assert!(client.exited());

    // 수동 시작 후 종료되면 재시작
    let token = CancellationToken::new();
    manager.start(&token, "test-plugin").await.unwrap();
    assert_eq!(client.starts(), 1);
    assert!(!client.exited());

    client.kill();
    let watcher = client.clone();
    wait_until(|| watcher.starts() == 2 && !watcher.exited()).await;

    // 토큰 취소 시 정지
    token.cancel();
    let watcher = client.clone();
    wait_until(|| watcher.stops() == 2).await;
}

#[tokio::test]
async fn test_shutdown_stops_every_client() {
    let manager = test_manager();
    let managed = Arc::new(TestClient::new("managed-plugin", true));
    let unmanaged = Arc::new(TestClient::new("unmanaged-plugin", false));

    for (id, client) in [("managed-plugin", &managed), ("unmanaged-plugin", &unmanaged)] {
        let descriptor = PluginDescriptor::new(id, PluginType::App, format!("/plugins/{}", id))
            .with_backend(None);
        manager
            .register_and_start(LoadedPlugin::new(descriptor).with_client(client.clone()))
            .await
            .unwrap();
    }

    manager.shutdown().await;
    assert_eq!(managed.stops(), 1);
    assert_eq!(unmanaged.stops(), 1);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(managed.stops(), 1);
}

#[tokio::test]
async fn test_shutdown_after_run_does_not_stop_again() {
    let manager = Arc::new(test_manager());
    let client = Arc::new(TestClient::new("test-plugin", true));
    manager.register_and_start(backend_plugin(&client)).await.unwrap();

    let err = run_then_cancel(&manager, tokio::time::sleep(Duration::from_millis(20))).await;
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(client.stops(), 1);

    // 바이너리는 run 이후 항상 shutdown을 호출함
    manager.shutdown().await;
    assert_eq!(client.stops(), 1);
}
