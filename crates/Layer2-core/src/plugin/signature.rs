//! Signature verification
//!
//! 플러그인 디렉토리의 `MANIFEST.json`을 읽어 서명/무결성을 검증하고
//! [`TrustOutcome`]을 만듭니다.
//!
//! 검증 순서:
//! 1. core/bundled 플러그인은 검증하지 않음 (Internal)
//! 2. 매니페스트가 없으면 Unsigned (정책상 허용된 ID만 통과)
//! 3. 매니페스트 형식, 버전(2.x), 플러그인 ID/버전 일치
//! 4. 신뢰 키가 설정되어 있으면 ed25519 서명 확인
//! 5. 나열된 파일의 SHA-256, 나열되지 않은 파일 존재 여부
//! 6. private 서명은 root URL 일치 확인

use super::descriptor::{PluginClass, PluginDescriptor, SignatureStatus, SignatureType, TrustOutcome};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use plinth_foundation::{Error, Result, SignatureErrorKind, SignaturePolicy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Component, Path};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 플러그인 루트의 서명 매니페스트 파일명
pub const MANIFEST_FILE: &str = "MANIFEST.json";

// ============================================================================
// SignatureManifest
// ============================================================================

/// `MANIFEST.json` 내용
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SignatureManifest {
    pub manifest_version: String,
    pub signature_type: String,
    #[serde(default)]
    pub signed_by_org: String,
    #[serde(default)]
    pub signed_by_org_name: String,
    #[serde(default)]
    pub root_urls: Vec<String>,
    pub plugin: String,
    pub version: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub key_id: String,
    /// 상대 경로 -> SHA-256 hex
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl SignatureManifest {
    pub fn is_v2(&self) -> bool {
        self.manifest_version.starts_with("2.")
    }

    /// 서명 대상 바이트 - `signature` 필드를 뺀 정규 JSON
    pub fn signed_payload(&self) -> Result<Vec<u8>> {
        let mut body = self.clone();
        body.signature = None;
        Ok(serde_json::to_vec(&body)?)
    }

    /// 패키징 도구용 서명
    pub fn sign(&mut self, key_id: impl Into<String>, key: &SigningKey) -> Result<()> {
        self.key_id = key_id.into();
        let payload = self.signed_payload()?;
        self.signature = Some(BASE64.encode(key.sign(&payload).to_bytes()));
        Ok(())
    }

    /// 디렉토리의 모든 파일 해시로 `files` 채우기
    pub fn collect_files(&mut self, plugin_dir: &Path) -> Result<()> {
        self.files.clear();
        for (rel, path) in plugin_files(plugin_dir) {
            self.files.insert(rel, sha256_file(&path)?);
        }
        Ok(())
    }

    fn verify_signature(&self, public_key_b64: &str) -> std::result::Result<(), String> {
        let signature_b64 = self.signature.as_deref().ok_or("manifest is not signed")?;
        let signature_raw = BASE64
            .decode(signature_b64)
            .map_err(|e| format!("invalid signature encoding: {}", e))?;
        let signature =
            Signature::from_slice(&signature_raw).map_err(|e| format!("invalid signature bytes: {}", e))?;

        let key_raw = BASE64
            .decode(public_key_b64)
            .map_err(|e| format!("invalid trusted key encoding: {}", e))?;
        let key_raw: [u8; 32] = key_raw
            .try_into()
            .map_err(|_| "invalid trusted key length (expected 32 bytes)".to_string())?;
        let key = VerifyingKey::from_bytes(&key_raw).map_err(|e| format!("invalid ed25519 public key: {}", e))?;

        let payload = self.signed_payload().map_err(|e| e.to_string())?;
        key.verify(&payload, &signature)
            .map_err(|e| format!("signature verification failed: {}", e))
    }
}

/// 공개키를 base64로 (trusted key 설정용)
pub fn encode_public_key(key: &VerifyingKey) -> String {
    BASE64.encode(key.to_bytes())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// 매니페스트를 제외한 모든 파일 (심볼릭 링크는 따라감)
///
/// 상대 경로는 `/` 구분자로 정규화됩니다.
fn plugin_files(plugin_dir: &Path) -> Vec<(String, std::path::PathBuf)> {
    let mut files = Vec::new();

    for entry in WalkDir::new(plugin_dir).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry under {:?}: {}", plugin_dir, e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(rel) = entry.path().strip_prefix(plugin_dir) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel == MANIFEST_FILE {
            continue;
        }
        files.push((rel, entry.path().to_path_buf()));
    }

    files
}

// ============================================================================
// Root URL
// ============================================================================

/// scheme/host/port/path 비교용 정규화 (끝의 `/` 무시)
fn normalize_root_url(raw: &str) -> Option<(String, String, Option<u16>, String)> {
    let url = url::Url::parse(raw).ok()?;
    Some((
        url.scheme().to_string(),
        url.host_str()?.to_ascii_lowercase(),
        url.port_or_known_default(),
        url.path().trim_end_matches('/').to_string(),
    ))
}

fn root_url_matches(configured: &str, allowed: &[String]) -> bool {
    let Some(configured) = normalize_root_url(configured) else {
        return false;
    };
    allowed
        .iter()
        .filter_map(|u| normalize_root_url(u))
        .any(|u| u == configured)
}

// ============================================================================
// SignatureVerifier
// ============================================================================

/// 서명 정책에 따라 플러그인을 판정
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    policy: SignaturePolicy,
}

impl SignatureVerifier {
    pub fn new(policy: SignaturePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SignaturePolicy {
        &self.policy
    }

    /// 파일 해싱은 blocking pool에서 수행
    pub async fn verify(&self, descriptor: &PluginDescriptor) -> TrustOutcome {
        let verifier = self.clone();
        let descriptor = descriptor.clone();
        let plugin_id = descriptor.id.clone();

        match tokio::task::spawn_blocking(move || verifier.verify_blocking(&descriptor)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Signature verification task for '{}' failed: {}", plugin_id, e);
                TrustOutcome::rejected(SignatureStatus::Invalid, SignatureErrorKind::Invalid)
            }
        }
    }

    pub fn verify_blocking(&self, descriptor: &PluginDescriptor) -> TrustOutcome {
        match descriptor.class {
            PluginClass::Core => return TrustOutcome::internal(SignatureType::Core),
            PluginClass::Bundled => return TrustOutcome::internal(SignatureType::Internal),
            PluginClass::External => {}
        }

        let manifest_path = descriptor.plugin_dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return self.unsigned(descriptor);
        }

        let manifest = match read_manifest(&manifest_path) {
            Ok(manifest) => manifest,
            Err(e) => return invalid(&descriptor.id, e),
        };

        self.verify_manifest(descriptor, &manifest)
    }

    fn unsigned(&self, descriptor: &PluginDescriptor) -> TrustOutcome {
        let mut outcome = TrustOutcome {
            signature: SignatureStatus::Unsigned,
            signature_type: SignatureType::Unsigned,
            ..Default::default()
        };

        if self.policy.allows_unsigned(&descriptor.id) {
            warn!("Permitting unsigned plugin '{}'", descriptor.id);
        } else {
            debug!("Plugin '{}' is unsigned", descriptor.id);
            outcome.errors.push(SignatureErrorKind::Unsigned);
        }
        outcome
    }

    fn verify_manifest(&self, descriptor: &PluginDescriptor, manifest: &SignatureManifest) -> TrustOutcome {
        let id = &descriptor.id;

        if !manifest.is_v2() {
            return invalid(id, format!("unsupported manifest version {}", manifest.manifest_version));
        }
        if manifest.plugin != descriptor.id {
            return invalid(id, format!("manifest is for plugin '{}'", manifest.plugin));
        }
        if manifest.version != descriptor.info.version {
            return invalid(
                id,
                format!("manifest version {} does not match {}", manifest.version, descriptor.info.version),
            );
        }
        let Some(signature_type) = SignatureType::parse(&manifest.signature_type) else {
            return invalid(id, format!("unknown signature type '{}'", manifest.signature_type));
        };

        // 신뢰 키가 없으면 checksum만 확인
        if !self.policy.trusted_keys.is_empty() {
            let Some(public_key) = self.policy.trusted_keys.get(&manifest.key_id) else {
                return invalid(id, format!("untrusted key id '{}'", manifest.key_id));
            };
            if let Err(e) = manifest.verify_signature(public_key) {
                return invalid(id, e);
            }
        }

        if let Some(reason) = integrity_violation(&descriptor.plugin_dir, manifest) {
            warn!("Plugin '{}' has a modified signature: {}", id, reason);
            return TrustOutcome::rejected(SignatureStatus::Modified, SignatureErrorKind::Modified);
        }

        if signature_type == SignatureType::Private && !root_url_matches(&self.policy.root_url, &manifest.root_urls) {
            return invalid(
                id,
                format!("root URL {} is not listed in {:?}", self.policy.root_url, manifest.root_urls),
            );
        }

        debug!("Plugin '{}' has a valid {:?} signature", id, signature_type);
        TrustOutcome {
            signature: SignatureStatus::Valid,
            signature_type,
            signature_org: manifest.signed_by_org_name.clone(),
            signed_files: manifest.files.keys().cloned().collect(),
            errors: Vec::new(),
        }
    }
}

fn read_manifest(path: &Path) -> Result<SignatureManifest> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(Error::from)
}

fn invalid(plugin_id: &str, reason: impl std::fmt::Display) -> TrustOutcome {
    warn!("Plugin '{}' has an invalid signature: {}", plugin_id, reason);
    TrustOutcome::rejected(SignatureStatus::Invalid, SignatureErrorKind::Invalid)
}

/// 무결성 위반 사유 (없으면 None)
fn integrity_violation(plugin_dir: &Path, manifest: &SignatureManifest) -> Option<String> {
    for (rel, expected) in &manifest.files {
        let rel_path = Path::new(rel);
        let escapes = rel_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Some(format!("manifest lists a path outside the plugin: {}", rel));
        }

        match sha256_file(&plugin_dir.join(rel_path)) {
            Ok(actual) if actual.eq_ignore_ascii_case(expected) => {}
            Ok(_) => return Some(format!("checksum mismatch for {}", rel)),
            Err(_) => return Some(format!("missing file {}", rel)),
        }
    }

    plugin_files(plugin_dir)
        .into_iter()
        .find(|(rel, _)| !manifest.files.contains_key(rel))
        .map(|(rel, _)| format!("unlisted file {}", rel))
}
