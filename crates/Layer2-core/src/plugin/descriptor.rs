//! Plugin Descriptor - 플러그인 메타데이터 정의
//!
//! `plugin.json`에서 읽어온 정적 정보와, 서명 검증 후 채워지는
//! trust 정보를 함께 담습니다.

use plinth_foundation::SignatureErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use super::traits::PluginClient;

// ============================================================================
// 분류
// ============================================================================

/// 플러그인 종류
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    #[default]
    Datasource,
    Panel,
    App,
    Renderer,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Datasource => "datasource",
            PluginType::Panel => "panel",
            PluginType::App => "app",
            PluginType::Renderer => "renderer",
        }
    }
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 플러그인 출처
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PluginClass {
    /// 호스트에 내장된 플러그인
    Core,
    /// 배포판과 함께 제공되는 플러그인
    Bundled,
    /// 사용자가 설치한 플러그인
    #[default]
    External,
}

/// 서명 검증 결과
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    /// core/bundled - 검증 생략
    Internal,
    Valid,
    Invalid,
    Modified,
    #[default]
    Unsigned,
}

impl SignatureStatus {
    pub fn is_trusted(&self) -> bool {
        matches!(self, SignatureStatus::Internal | SignatureStatus::Valid)
    }
}

/// 서명 주체 종류
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureType {
    Internal,
    Core,
    #[serde(alias = "grafana")]
    Platform,
    Commercial,
    Community,
    Private,
    #[default]
    Unsigned,
}

impl SignatureType {
    /// 매니페스트의 `signatureType` 문자열 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "internal" => Some(SignatureType::Internal),
            "core" => Some(SignatureType::Core),
            "platform" | "grafana" => Some(SignatureType::Platform),
            "commercial" => Some(SignatureType::Commercial),
            "community" => Some(SignatureType::Community),
            "private" => Some(SignatureType::Private),
            _ => None,
        }
    }
}

// ============================================================================
// 메타데이터
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PluginAuthor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PluginLogos {
    #[serde(default)]
    pub small: String,
    #[serde(default)]
    pub large: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Screenshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
}

/// `info` 블록
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PluginInfo {
    #[serde(default)]
    pub author: PluginAuthor,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub logos: PluginLogos,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub updated: String,
}

/// 다른 플러그인에 대한 의존성
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PluginDependency {
    pub id: String,
    #[serde(rename = "type", default)]
    pub plugin_type: PluginType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PluginDependencies {
    /// 호스트 최소 버전 요구사항
    #[serde(default, alias = "grafanaDependency", alias = "grafanaVersion")]
    pub platform_version: String,
    #[serde(default)]
    pub plugins: Vec<PluginDependency>,
}

// ============================================================================
// PluginDescriptor
// ============================================================================

/// 발견된 플러그인 하나의 전체 메타데이터
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub name: String,
    pub state: Option<String>,
    pub info: PluginInfo,
    pub dependencies: PluginDependencies,

    /// 플러그인이 설치된 디렉토리
    pub plugin_dir: PathBuf,
    pub class: PluginClass,

    /// 백엔드 프로세스를 가지는지 여부
    pub backend: bool,
    pub executable: Option<String>,

    /// 프론트엔드 자산 경로
    pub module: String,
    pub base_url: String,

    // trust 정보 - 검증 후 채워짐
    pub signature: SignatureStatus,
    pub signature_type: SignatureType,
    pub signature_org: String,
    pub signed_files: BTreeSet<String>,
    pub signature_errors: Vec<SignatureErrorKind>,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<String>, plugin_type: PluginType, plugin_dir: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            plugin_type,
            plugin_dir: plugin_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_class(mut self, class: PluginClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.info.version = version.into();
        self
    }

    pub fn with_backend(mut self, executable: Option<String>) -> Self {
        self.backend = true;
        self.executable = executable;
        self
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn is_core(&self) -> bool {
        self.class == PluginClass::Core
    }

    pub fn is_bundled(&self) -> bool {
        self.class == PluginClass::Bundled
    }

    pub fn is_external(&self) -> bool {
        self.class == PluginClass::External
    }

    /// 검증 결과 반영
    pub fn apply_trust(&mut self, outcome: TrustOutcome) {
        self.signature = outcome.signature;
        self.signature_type = outcome.signature_type;
        self.signature_org = outcome.signature_org;
        self.signed_files = outcome.signed_files;
        self.signature_errors = outcome.errors;
    }

    pub fn is_trusted(&self) -> bool {
        self.signature_errors.is_empty()
    }
}

/// 서명 검증기의 판정 결과
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrustOutcome {
    pub signature: SignatureStatus,
    pub signature_type: SignatureType,
    pub signature_org: String,
    pub signed_files: BTreeSet<String>,
    /// 비어 있으면 등록 허용
    pub errors: Vec<SignatureErrorKind>,
}

impl TrustOutcome {
    pub fn internal(signature_type: SignatureType) -> Self {
        Self {
            signature: SignatureStatus::Internal,
            signature_type,
            ..Default::default()
        }
    }

    pub fn rejected(signature: SignatureStatus, kind: SignatureErrorKind) -> Self {
        Self {
            signature,
            errors: vec![kind],
            ..Default::default()
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 백엔드 플러그인의 라우팅 정보
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginRoute {
    pub plugin_id: String,
    pub directory: PathBuf,
}

/// 로더가 돌려주는 단위 - 메타데이터와 (있다면) 백엔드 클라이언트
#[derive(Clone)]
pub struct LoadedPlugin {
    pub descriptor: PluginDescriptor,
    pub client: Option<Arc<dyn PluginClient>>,
}

impl LoadedPlugin {
    pub fn new(descriptor: PluginDescriptor) -> Self {
        Self {
            descriptor,
            client: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn PluginClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("descriptor", &self.descriptor)
            .field("has_client", &self.client.is_some())
            .finish()
    }
}
