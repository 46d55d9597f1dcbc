//! plinth-core: Plugin host runtime for Plinth
//!
//! Layer2 - 플러그인 발견, 서명 검증, 프로세스 감독, 요청 전달
//!
//! # 사용 예시
//!
//! ```ignore
//! use plinth_core::{ArchiveInstaller, FsLoader, PluginManager, process_factory};
//!
//! let loader = FsLoader::new().with_factory(process_factory(vec![]));
//! let manager = PluginManager::new(config, Arc::new(loader), Arc::new(ArchiveInstaller::new()));
//! manager.init().await?;
//!
//! for route in manager.routes().await {
//!     println!("{} -> {:?}", route.plugin_id, route.directory);
//! }
//! ```

pub mod plugin;

// Re-exports: Plugin
pub use plugin::{
    // Manager
    PluginManager,
    PluginDiagnostic,
    // Descriptor
    LoadedPlugin,
    PluginClass,
    PluginDescriptor,
    PluginRoute,
    PluginType,
    SignatureStatus,
    SignatureType,
    // Traits
    PluginBackend,
    PluginCapability,
    PluginClient,
    PluginFactory,
    Licensing,
    RequestValidator,
    // Loader / Installer
    ArchiveInstaller,
    FsLoader,
    InstallOpts,
    Installer,
    Loader,
    UpdateInfo,
    // Process
    process_factory,
    ProcessClient,
    // Trust
    SignatureManifest,
    SignatureVerifier,
};

// Layer1 re-exports
pub use plinth_foundation::{Error, Result};

/// Layer2 버전
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
