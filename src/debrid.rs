//! Debrid port
//!
//! Contract over debrid services: add a magnet, poll its status, enumerate
//! files, obtain a streamable URL, cancel or delete. The port is polled by
//! the playback/streaming layers with a fixed interval and a ceiling, never
//! pushed. API keys are encrypted at rest with a locally generated vault
//! key.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebridItemStatus {
    Downloading,
    Queued,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebridFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub index: usize,
}

/// A torrent as seen by the debrid service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentItem {
    pub id: String,
    pub name: String,
    pub status: DebridItemStatus,
    /// 0..1
    pub completion: f64,
    pub files: Vec<DebridFile>,
}

#[async_trait]
pub trait DebridProvider: Send + Sync {
    fn id(&self) -> &'static str;

    /// Returns the provider-side item id.
    async fn add_torrent(&self, magnet: &str) -> Result<String>;

    async fn get_info(&self, item_id: &str) -> Result<TorrentItem>;

    async fn stream_url(&self, item_id: &str, file_id: &str) -> Result<String>;

    async fn delete(&self, item_id: &str) -> Result<()>;

    async fn cancel(&self, item_id: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<TorrentItem>>;
}

/// Poll an item until ready. Fixed interval, hard ceiling.
pub async fn wait_until_ready(
    provider: &dyn DebridProvider,
    item_id: &str,
    interval: Duration,
    ceiling: Duration,
) -> Result<TorrentItem> {
    let start = std::time::Instant::now();
    loop {
        let item = provider.get_info(item_id).await?;
        match item.status {
            DebridItemStatus::Ready => return Ok(item),
            DebridItemStatus::Error => anyhow::bail!("Debrid item {item_id} errored"),
            _ => {}
        }
        if start.elapsed() >= ceiling {
            anyhow::bail!("Timed out waiting for debrid item {item_id}");
        }
        tokio::time::sleep(interval).await;
    }
}

// ---------------------------------------------------------------------------
// Credential vault

/// Encrypts provider API keys at rest. The vault key lives next to the
/// database and is generated on first use.
pub struct CredentialVault {
    key_path: PathBuf,
}

impl CredentialVault {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            key_path: data_dir.join("vault.key"),
        }
    }

    fn key(&self) -> Result<Key<Aes256Gcm>> {
        if let Ok(encoded) = std::fs::read_to_string(&self.key_path) {
            let bytes = B64
                .decode(encoded.trim())
                .context("Corrupt vault key file")?;
            anyhow::ensure!(bytes.len() == 32, "Vault key has wrong length");
            return Ok(*Key::<Aes256Gcm>::from_slice(&bytes));
        }
        let key = Aes256Gcm::generate_key(OsRng);
        std::fs::write(&self.key_path, B64.encode(key))
            .context("Failed to persist vault key")?;
        Ok(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<(String, String)> {
        let cipher = Aes256Gcm::new(&self.key()?);
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("Encryption failed"))?;
        Ok((B64.encode(ciphertext), B64.encode(nonce_bytes)))
    }

    pub fn decrypt(&self, ciphertext_b64: &str, nonce_b64: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(&self.key()?);
        let ciphertext = B64.decode(ciphertext_b64).context("Corrupt ciphertext")?;
        let nonce_bytes = B64.decode(nonce_b64).context("Corrupt nonce")?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| anyhow::anyhow!("Decryption failed"))?;
        String::from_utf8(plaintext).context("Decrypted key is not UTF-8")
    }
}

// ---------------------------------------------------------------------------
// TorBox-style provider

const TORBOX_API: &str = "https://api.torbox.app/v1/api";

pub struct TorBoxProvider {
    client: reqwest::Client,
    api_key: String,
}

impl TorBoxProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key,
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(format!("{TORBOX_API}{path}"))
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    fn parse_item(raw: &serde_json::Value) -> TorrentItem {
        let finished = raw["download_finished"].as_bool().unwrap_or(false);
        let state = raw["download_state"].as_str().unwrap_or("");
        let status = if finished {
            DebridItemStatus::Ready
        } else {
            match state {
                "downloading" | "metaDL" | "checking" => DebridItemStatus::Downloading,
                "error" | "failed" | "stalled (no seeds)" => DebridItemStatus::Error,
                _ => DebridItemStatus::Queued,
            }
        };
        let files = raw["files"]
            .as_array()
            .map(|files| {
                files
                    .iter()
                    .enumerate()
                    .map(|(index, f)| DebridFile {
                        id: f["id"]
                            .as_i64()
                            .map(|i| i.to_string())
                            .unwrap_or_else(|| index.to_string()),
                        name: f["short_name"]
                            .as_str()
                            .or_else(|| f["name"].as_str())
                            .unwrap_or_default()
                            .to_string(),
                        size: f["size"].as_u64().unwrap_or(0),
                        index,
                    })
                    .collect()
            })
            .unwrap_or_default();

        TorrentItem {
            id: raw["id"].as_i64().map(|i| i.to_string()).unwrap_or_default(),
            name: raw["name"].as_str().unwrap_or_default().to_string(),
            status,
            completion: raw["progress"].as_f64().unwrap_or(if finished { 1.0 } else { 0.0 }),
            files,
        }
    }
}

#[async_trait]
impl DebridProvider for TorBoxProvider {
    fn id(&self) -> &'static str {
        "torbox"
    }

    async fn add_torrent(&self, magnet: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!("{TORBOX_API}/torrents/createtorrent"))
            .bearer_auth(&self.api_key)
            .form(&[("magnet", magnet)])
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let id = body["data"]["torrent_id"]
            .as_i64()
            .context("Provider did not return a torrent id")?;
        tracing::info!(item_id = id, "Added magnet to debrid service");
        Ok(id.to_string())
    }

    async fn get_info(&self, item_id: &str) -> Result<TorrentItem> {
        let body = self
            .get_json("/torrents/mylist", &[("id", item_id), ("bypass_cache", "true")])
            .await?;
        let data = &body["data"];
        anyhow::ensure!(!data.is_null(), "Debrid item not found: {item_id}");
        Ok(Self::parse_item(data))
    }

    async fn stream_url(&self, item_id: &str, file_id: &str) -> Result<String> {
        let body = self
            .get_json(
                "/torrents/requestdl",
                &[("torrent_id", item_id), ("file_id", file_id)],
            )
            .await?;
        body["data"]
            .as_str()
            .map(|s| s.to_string())
            .context("Provider did not return a stream URL")
    }

    async fn delete(&self, item_id: &str) -> Result<()> {
        self.client
            .post(format!("{TORBOX_API}/torrents/controltorrent"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "torrent_id": item_id, "operation": "delete" }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn cancel(&self, item_id: &str) -> Result<()> {
        self.client
            .post(format!("{TORBOX_API}/torrents/controltorrent"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "torrent_id": item_id, "operation": "stop_seeding" }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TorrentItem>> {
        let body = self.get_json("/torrents/mylist", &[]).await?;
        Ok(body["data"]
            .as_array()
            .map(|items| items.iter().map(Self::parse_item).collect())
            .unwrap_or_default())
    }
}

/// Builds the configured provider from settings, decrypting the API key.
pub fn provider_from_settings(
    settings: &Settings,
    vault: &CredentialVault,
) -> Result<Option<Arc<dyn DebridProvider>>> {
    if !settings.debrid.enabled || settings.debrid.encrypted_api_key.is_empty() {
        return Ok(None);
    }
    let api_key = vault.decrypt(&settings.debrid.encrypted_api_key, &settings.debrid.nonce)?;
    match settings.debrid.provider.as_str() {
        "torbox" | "" => Ok(Some(Arc::new(TorBoxProvider::new(api_key)))),
        other => anyhow::bail!("Unknown debrid provider: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());
        let (ciphertext, nonce) = vault.encrypt("super-secret-key").unwrap();
        assert_ne!(ciphertext, "super-secret-key");
        assert_eq!(vault.decrypt(&ciphertext, &nonce).unwrap(), "super-secret-key");
    }

    #[test]
    fn test_vault_key_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let (ciphertext, nonce) = {
            let vault = CredentialVault::new(dir.path());
            vault.encrypt("k").unwrap()
        };
        let vault = CredentialVault::new(dir.path());
        assert_eq!(vault.decrypt(&ciphertext, &nonce).unwrap(), "k");
    }

    #[test]
    fn test_parse_item_states() {
        let raw = serde_json::json!({
            "id": 42,
            "name": "Show",
            "download_finished": true,
            "download_state": "uploading",
            "progress": 1.0,
            "files": [{ "id": 7, "short_name": "ep1.mkv", "size": 100 }],
        });
        let item = TorBoxProvider::parse_item(&raw);
        assert_eq!(item.status, DebridItemStatus::Ready);
        assert_eq!(item.files.len(), 1);
        assert_eq!(item.files[0].id, "7");
    }
}
