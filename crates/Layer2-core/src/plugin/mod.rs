//! # Plugin System
//!
//! Plinth 플러그인 호스트
//!
//! ## 개요
//!
//! 디스크에서 플러그인을 발견하고, 서명을 검증한 뒤 등록하며,
//! 백엔드 플러그인 프로세스를 감독하고 요청을 전달합니다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PluginManager                           │
//! │  ┌──────────┐   ┌───────────────────┐   ┌───────────────┐  │
//! │  │  Loader  │──▶│ SignatureVerifier │──▶│PluginRegistry │  │
//! │  └──────────┘   └───────────────────┘   └───────┬───────┘  │
//! │                                                  │          │
//! │                 ┌────────────────────┐   ┌──────┴───────┐  │
//! │                 │  PluginDispatcher  │──▶│  Supervisor  │  │
//! │                 └────────────────────┘   │ (per plugin) │  │
//! │                                          └──────┬───────┘  │
//! │                                                 ▼          │
//! │                                          PluginClient      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 플러그인 출처
//!
//! 1. **Core**: 호스트에 내장, 서명 검증 생략
//! 2. **Bundled**: 배포판과 함께 제공, 서명 검증 생략
//! 3. **External**: 사용자가 설치, `MANIFEST.json` 검증 필요

mod backend;
mod descriptor;
mod dispatch;
mod installer;
mod loader;
mod manager;
mod process;
mod registry;
mod signature;
mod supervisor;
mod traits;

pub use backend::{
    CallResourceRequest, CallResourceResponse, CheckHealthRequest, CheckHealthResult, CollectMetricsResult,
    DataQuery, DataResponse, Headers, HealthStatus, InstanceSettings, PluginContext, PublishStreamRequest,
    PublishStreamResponse, QueryDataRequest, QueryDataResponse, RequestUser, RunStreamRequest,
    StreamPacket, StreamSender, StreamStatus, SubscribeStreamRequest, SubscribeStreamResponse, TimeRange,
};
pub use descriptor::{
    LoadedPlugin, PluginAuthor, PluginClass, PluginDependencies, PluginDependency, PluginDescriptor,
    PluginInfo, PluginLogos, PluginRoute, PluginType, Screenshot, SignatureStatus, SignatureType,
    TrustOutcome,
};
pub use dispatch::PluginDispatcher;
pub use installer::{download_url, ArchiveInstaller, InstallOpts, Installer, UpdateInfo};
pub use loader::{FsLoader, Loader, PLUGIN_JSON};
pub use manager::{PluginDiagnostic, PluginManager};
pub use process::{process_factory, ProcessClient};
pub use registry::{PluginRegistry, RegisteredPlugin};
pub use signature::{encode_public_key, sha256_file, SignatureManifest, SignatureVerifier, MANIFEST_FILE};
pub use supervisor::{ProcessState, Supervisor};
pub use traits::{
    AllowAllValidator, CallResourceResponseSender, Licensing, OpenSourceLicensing, PluginBackend,
    PluginCapability, PluginClient, PluginFactory, RequestValidator,
};
