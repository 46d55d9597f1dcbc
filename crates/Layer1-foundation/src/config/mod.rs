//! Config - 호스트 설정 관리
//!
//! - `host.rs` - HostConfig 통합 설정 및 서명 정책

mod host;

pub use host::{
    Enforcement, HostConfig, HostEnv, PluginSettings, SignaturePolicy, HOST_CONFIG_FILE,
};
