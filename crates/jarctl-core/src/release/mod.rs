mod http;
mod retry;

pub use http::HttpReleaseSource;

use std::path::{Component, Path};

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::errors::ManagerError;

/// One downloadable artifact of an upstream release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: String,
    pub asset_name: String,
    pub download_url: String,
    pub sha256: Option<String>,
}

impl Release {
    /// Two releases are the same artifact when tag and file name agree.
    pub fn is_same_artifact(&self, version: &str, asset_name: &str) -> bool {
        normalize_version(&self.version) == normalize_version(version)
            && self.asset_name == asset_name
    }

    /// The asset name, provided it is a plain file name that stays inside
    /// whatever directory it is joined onto.
    pub fn file_name(&self) -> Result<&str, ManagerError> {
        let mut components = Path::new(&self.asset_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(&self.asset_name),
            _ => Err(ManagerError::Release(format!(
                "refusing asset name '{}'",
                self.asset_name
            ))),
        }
    }
}

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn latest(&self) -> Result<Release, ManagerError>;

    /// Write the artifact bytes to exactly `dest`.
    async fn download(&self, release: &Release, dest: &Path) -> Result<(), ManagerError>;
}

#[derive(Debug, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
pub struct GithubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub digest: Option<String>,
}

impl GithubRelease {
    /// Pick the first asset whose name passes `accept`.
    pub fn select(self, accept: impl Fn(&str) -> bool) -> Result<Release, ManagerError> {
        let tag = self.tag_name;
        let asset = self
            .assets
            .into_iter()
            .find(|asset| accept(&asset.name))
            .ok_or_else(|| ManagerError::Release(format!("release {tag} has no matching asset")))?;
        let sha256 = asset
            .digest
            .as_deref()
            .and_then(|digest| digest.strip_prefix("sha256:"))
            .map(|hex| hex.to_ascii_lowercase());
        let release = Release {
            version: tag,
            asset_name: asset.name,
            download_url: asset.browser_download_url,
            sha256,
        };
        release.file_name()?;
        Ok(release)
    }
}

pub fn parse_github_release(body: &[u8]) -> Result<GithubRelease, ManagerError> {
    let release = serde_json::from_slice::<GithubRelease>(body)?;
    if release.tag_name.trim().is_empty() {
        return Err(ManagerError::Release("release has an empty tag".into()));
    }
    Ok(release)
}

pub fn normalize_version(value: &str) -> String {
    value.trim().trim_start_matches('v').to_string()
}

pub fn sha256_matches(bytes: &[u8], expected_hex: &str) -> bool {
    let digest = Sha256::digest(bytes);
    hex::encode(digest).eq_ignore_ascii_case(expected_hex.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "tag_name": "v4.1.0",
        "assets": [
            {"name": "server-4.1.0.jar.sha256", "browser_download_url": "https://dl/sha"},
            {"name": "server-4.1.0.jar", "browser_download_url": "https://dl/jar",
             "digest": "sha256:ABCDEF"}
        ]
    }"#;

    #[test]
    fn selects_first_asset_with_suffix() {
        let release = parse_github_release(BODY.as_bytes())
            .unwrap()
            .select(|name| name.ends_with(".jar"))
            .unwrap();
        assert_eq!(release.version, "v4.1.0");
        assert_eq!(release.asset_name, "server-4.1.0.jar");
        assert_eq!(release.download_url, "https://dl/jar");
        assert_eq!(release.sha256.as_deref(), Some("abcdef"));
    }

    #[test]
    fn release_without_matching_asset_is_an_error() {
        let err = parse_github_release(BODY.as_bytes())
            .unwrap()
            .select(|name| name.ends_with(".zip"))
            .unwrap_err();
        assert!(matches!(err, ManagerError::Release(_)));
    }

    #[test]
    fn asset_names_must_stay_in_place() {
        let named = |name: &str| Release {
            version: "1.0.0".into(),
            asset_name: name.into(),
            download_url: String::new(),
            sha256: None,
        };
        assert_eq!(named("server-1.0.0.jar").file_name().unwrap(), "server-1.0.0.jar");
        for bad in ["../../escaped.jar", "/etc/passwd.jar", "lib/server.jar", "..", ".", ""] {
            assert!(
                matches!(named(bad).file_name(), Err(ManagerError::Release(_))),
                "{bad}"
            );
        }

        let body = r#"{"tag_name": "v2", "assets": [
            {"name": "../up.jar", "browser_download_url": "https://dl/up"}
        ]}"#;
        let err = parse_github_release(body.as_bytes())
            .unwrap()
            .select(|name| name.ends_with(".jar"))
            .unwrap_err();
        assert!(matches!(err, ManagerError::Release(_)));
    }

    #[test]
    fn same_artifact_ignores_v_prefix() {
        let release = Release {
            version: "v1.2.3".into(),
            asset_name: "a.jar".into(),
            download_url: String::new(),
            sha256: None,
        };
        assert!(release.is_same_artifact("1.2.3", "a.jar"));
        assert!(!release.is_same_artifact("1.2.4", "a.jar"));
        assert!(!release.is_same_artifact("1.2.3", "b.jar"));
    }

    #[test]
    fn sha256_verification_works() {
        let expected = hex::encode(Sha256::digest(b"jarctl"));
        assert!(sha256_matches(b"jarctl", &expected));
        assert!(sha256_matches(b"jarctl", &expected.to_uppercase()));
        assert!(!sha256_matches(b"jarctl", "deadbeef"));
    }
}
