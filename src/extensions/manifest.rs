//! Extension manifests

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionType {
    AnimeTorrentProvider,
    MangaProvider,
    OnlinestreamProvider,
    CustomSource,
    Plugin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionLanguage {
    /// Native provider compiled into the server
    Go,
    #[serde(rename = "js", alias = "javascript")]
    Javascript,
    #[serde(rename = "ts", alias = "typescript")]
    Typescript,
}

/// One user-configurable field declared by the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfigField {
    pub key: String,
    pub label: String,
    /// "text" | "password" | "switch" | "number"
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub default: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    /// Unique id: starts with a letter, alphanumeric/dash only
    pub id: String,
    pub name: String,
    pub version: String,
    /// Where the manifest was fetched from; "builtin" for native providers
    #[serde(default)]
    pub manifest_uri: String,
    pub language: ExtensionLanguage,
    #[serde(rename = "type")]
    pub kind: ExtensionType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Permissions requested by the extension, e.g. "fetch:nyaa.si"
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub user_config: Vec<UserConfigField>,
    /// Inline source; empty when payload_uri is set
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub payload_uri: String,
}

impl ExtensionManifest {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.id.is_empty(), "extension id is empty");
        let mut chars = self.id.chars();
        let first = chars.next().unwrap_or(' ');
        anyhow::ensure!(
            first.is_ascii_alphabetic(),
            "extension id must start with a letter"
        );
        anyhow::ensure!(
            self.id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-'),
            "extension id may only contain alphanumeric characters and dashes"
        );
        anyhow::ensure!(!self.name.is_empty(), "extension name is empty");
        anyhow::ensure!(!self.version.is_empty(), "extension version is empty");
        if matches!(
            self.language,
            ExtensionLanguage::Javascript | ExtensionLanguage::Typescript
        ) {
            anyhow::ensure!(
                !self.payload.is_empty() || !self.payload_uri.is_empty(),
                "script extension has no payload"
            );
        }
        Ok(())
    }

    pub fn is_builtin(&self) -> bool {
        self.manifest_uri == "builtin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ExtensionManifest {
        serde_json::from_value(serde_json::json!({
            "id": "example-provider",
            "name": "Example",
            "version": "1.0.0",
            "language": "js",
            "type": "anime-torrent-provider",
            "payload": "function search() { return [] }",
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_manifest() {
        assert!(manifest().validate().is_ok());
        assert_eq!(manifest().kind, ExtensionType::AnimeTorrentProvider);
    }

    #[test]
    fn test_invalid_ids() {
        let mut m = manifest();
        m.id = "1bad".into();
        assert!(m.validate().is_err());
        m.id = "has space".into();
        assert!(m.validate().is_err());
        m.id = "".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_script_needs_payload() {
        let mut m = manifest();
        m.payload = String::new();
        assert!(m.validate().is_err());
    }
}
