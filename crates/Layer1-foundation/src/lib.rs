//! # plinth-foundation
//!
//! Foundation layer for Plinth:
//! - Error: 공통 에러 타입 (trust / lifecycle / capability / process)
//! - Config: 호스트 설정 (HostConfig, SignaturePolicy)
//! - Logging: tracing subscriber bootstrap

pub mod config;
pub mod error;
pub mod logging;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result, SignatureErrorKind};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    Enforcement, HostConfig, HostEnv, PluginSettings, SignaturePolicy, HOST_CONFIG_FILE,
};

/// Foundation 버전
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
