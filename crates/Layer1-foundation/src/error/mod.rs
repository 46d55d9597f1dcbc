//! Error types for Plinth
//!
//! Every layer returns this single error type so that trust, lifecycle and
//! capability failures can be matched on by callers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trust classification that caused a plugin to be rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureErrorKind {
    Unsigned,
    Invalid,
    Modified,
}

impl std::fmt::Display for SignatureErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsigned => write!(f, "is unsigned"),
            Self::Invalid => write!(f, "has an invalid signature"),
            Self::Modified => write!(f, "has a modified signature"),
        }
    }
}

/// Plinth 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 서명 검증 (trust)
    // ========================================================================
    #[error("plugin '{plugin_id}' {kind}")]
    Signature {
        plugin_id: String,
        kind: SignatureErrorKind,
    },

    // ========================================================================
    // 플러그인 라이프사이클
    // ========================================================================
    #[error("plugin '{plugin_id}' is already registered (installed at {})", existing_dir.display())]
    DuplicatePlugin {
        plugin_id: String,
        existing_dir: PathBuf,
    },

    #[error("plugin '{0}' is not registered")]
    NotRegistered(String),

    #[error("plugin '{0}' is not installed")]
    NotInstalled(String),

    #[error("plugin '{0}' is managed and cannot be manually started")]
    AlreadyManaged(String),

    #[error("cannot uninstall core or bundled plugin '{0}'")]
    UninstallCorePlugin(String),

    // ========================================================================
    // 원격 메서드 (capability)
    // ========================================================================
    #[error("method not implemented")]
    MethodNotImplemented,

    #[error("plugin '{0}' has no backend client")]
    NoClient(String),

    // ========================================================================
    // 프로세스
    // ========================================================================
    #[error("failed to start plugin '{plugin_id}': {message}")]
    PluginStart { plugin_id: String, message: String },

    #[error("failed to stop plugin '{plugin_id}': {message}")]
    PluginStop { plugin_id: String, message: String },

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Trust verification rejected the plugin
    pub fn is_trust_error(&self) -> bool {
        matches!(self, Error::Signature { .. })
    }

    /// Registration bookkeeping error (duplicate, missing, managed)
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Error::DuplicatePlugin { .. }
                | Error::NotRegistered(_)
                | Error::NotInstalled(_)
                | Error::AlreadyManaged(_)
                | Error::UninstallCorePlugin(_)
        )
    }

    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PluginStart { .. } | Error::Http(_))
    }

    pub fn signature(plugin_id: impl Into<String>, kind: SignatureErrorKind) -> Self {
        Error::Signature {
            plugin_id: plugin_id.into(),
            kind,
        }
    }

    pub fn plugin_start(plugin_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::PluginStart {
            plugin_id: plugin_id.into(),
            message: message.to_string(),
        }
    }

    pub fn plugin_stop(plugin_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::PluginStop {
            plugin_id: plugin_id.into(),
            message: message.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
