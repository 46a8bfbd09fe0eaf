//! Extension runtime and registry
//!
//! Extensions declare a manifest (id, version, type, language, permission
//! set, user-config schema) and a payload. Install fetches and validates
//! the manifest, stores the payload keyed by id, and leaves the extension
//! in `pending-grant` when its permissions differ from what was granted
//! before. Loading instantiates a typed provider per extension: script
//! payloads run in a per-extension sandbox VM, native ("go") extensions
//! are in-process objects behind the same traits. A mass-failing extension
//! is flagged in status but never disables itself.

pub mod bindings;
pub mod builtin;
pub mod manifest;
pub mod provider;
pub mod runtime;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tokio::sync::Semaphore;

use crate::db::{Database, StoredExtension};
use crate::events::{EventBus, WsEvent};
use manifest::{ExtensionLanguage, ExtensionManifest, ExtensionType};
use provider::ProviderInstance;
use runtime::{JsProvider, JsVm};

/// Concurrent invocations allowed per extension.
const CALLS_PER_EXTENSION: usize = 4;

pub const GRANT_GRANTED: &str = "granted";
pub const GRANT_PENDING: &str = "pending-grant";

/// A loaded, callable extension.
pub struct LoadedExtension {
    pub manifest: ExtensionManifest,
    pub instance: ProviderInstance,
    /// Bounds concurrent calls into this extension.
    pub semaphore: Arc<Semaphore>,
    failures: AtomicU64,
}

impl LoadedExtension {
    pub fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Status surfaced to the UI per installed extension.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    pub id: String,
    pub name: String,
    pub version: String,
    pub kind: ExtensionType,
    pub language: ExtensionLanguage,
    pub loaded: bool,
    pub grant_state: String,
    pub failure_count: u64,
}

#[derive(Clone)]
pub struct ExtensionRegistry {
    db: Database,
    events: EventBus,
    client: reqwest::Client,
    loaded: Arc<RwLock<HashMap<String, Arc<LoadedExtension>>>>,
}

impl ExtensionRegistry {
    pub fn new(db: Database, events: EventBus) -> Self {
        let registry = Self {
            db,
            events,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            loaded: Arc::new(RwLock::new(HashMap::new())),
        };
        registry.register_builtins();
        registry
    }

    fn register_builtins(&self) {
        let mut loaded = self.loaded.write();
        for (manifest, instance) in builtin::builtins() {
            loaded.insert(
                manifest.id.clone(),
                Arc::new(LoadedExtension {
                    manifest,
                    instance,
                    semaphore: Arc::new(Semaphore::new(CALLS_PER_EXTENSION)),
                    failures: AtomicU64::new(0),
                }),
            );
        }
    }

    /// Install from a manifest URI: fetch, validate, fetch payload, store.
    pub async fn install(&self, manifest_uri: &str) -> Result<ExtensionStatus> {
        let manifest: ExtensionManifest = self
            .client
            .get(manifest_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Manifest is not valid JSON")?;
        let mut manifest = manifest;
        manifest.manifest_uri = manifest_uri.to_string();
        self.install_manifest(manifest).await
    }

    /// Install a manifest that was already fetched (or pasted by the user).
    pub async fn install_manifest(&self, manifest: ExtensionManifest) -> Result<ExtensionStatus> {
        manifest.validate()?;

        let payload = if !manifest.payload.is_empty() {
            manifest.payload.clone()
        } else if !manifest.payload_uri.is_empty() {
            self.client
                .get(&manifest.payload_uri)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
                .context("Failed to fetch payload")?
        } else {
            String::new()
        };

        // Permission diff: a new or widened permission set needs the user's
        // grant before the extension may load.
        let previous = self.db.extensions().get(&manifest.id).await?;
        let grant_state = match &previous {
            Some(prev) if prev.grant_state == GRANT_GRANTED => {
                let prev_manifest: ExtensionManifest =
                    serde_json::from_str(&prev.manifest).unwrap_or_else(|_| manifest.clone());
                let prev_perms: HashSet<&String> = prev_manifest.permissions.iter().collect();
                let new_perms: HashSet<&String> = manifest.permissions.iter().collect();
                if new_perms.is_subset(&prev_perms) {
                    GRANT_GRANTED
                } else {
                    GRANT_PENDING
                }
            }
            _ if manifest.permissions.is_empty() => GRANT_GRANTED,
            _ => GRANT_PENDING,
        };

        let stored = StoredExtension {
            id: manifest.id.clone(),
            manifest: serde_json::to_string(&manifest)?,
            payload,
            grant_state: grant_state.to_string(),
            user_config: previous
                .map(|p| p.user_config)
                .unwrap_or_else(|| "{}".to_string()),
        };
        self.db.extensions().upsert(&stored).await?;

        self.events.send(WsEvent::ExtensionInstalled {
            id: manifest.id.clone(),
        });
        tracing::info!(id = %manifest.id, grant_state = grant_state, "Installed extension");

        if grant_state == GRANT_GRANTED {
            if let Err(e) = self.load_one(&stored).await {
                tracing::warn!(id = %manifest.id, error = %e, "Extension installed but failed to load");
            }
        }
        self.status_of(&manifest.id)
            .await?
            .context("Extension vanished after install")
    }

    /// Grant the requested permissions and load the extension.
    pub async fn grant(&self, id: &str) -> Result<()> {
        let stored = self
            .db
            .extensions()
            .get(id)
            .await?
            .with_context(|| format!("Extension not installed: {id}"))?;
        self.db.extensions().set_grant_state(id, GRANT_GRANTED).await?;
        let stored = StoredExtension {
            grant_state: GRANT_GRANTED.to_string(),
            ..stored
        };
        self.load_one(&stored).await
    }

    pub async fn uninstall(&self, id: &str) -> Result<()> {
        self.loaded.write().remove(id);
        self.db.extensions().delete(id).await?;
        self.events.send(WsEvent::ExtensionUninstalled { id: id.to_string() });
        tracing::info!(id = id, "Uninstalled extension");
        Ok(())
    }

    /// Load every granted extension from the database.
    pub async fn load_all(&self) -> Result<()> {
        for stored in self.db.extensions().list().await? {
            if stored.grant_state != GRANT_GRANTED {
                continue;
            }
            if let Err(e) = self.load_one(&stored).await {
                tracing::warn!(id = %stored.id, error = %e, "Failed to load extension");
            }
        }
        Ok(())
    }

    /// (Re)load one extension. The previous instance stays alive until the
    /// last in-flight call drops its handle, which is the hot-reload
    /// drain-then-discard semantics.
    pub async fn load_one(&self, stored: &StoredExtension) -> Result<()> {
        let manifest: ExtensionManifest =
            serde_json::from_str(&stored.manifest).context("Corrupt stored manifest")?;
        let user_config: serde_json::Value =
            serde_json::from_str(&stored.user_config).unwrap_or(serde_json::Value::Null);

        let instance = match manifest.language {
            ExtensionLanguage::Go => {
                // Native extensions resolve against the builtin table.
                builtin::builtins()
                    .into_iter()
                    .find(|(m, _)| m.id == manifest.id)
                    .map(|(_, i)| i)
                    .with_context(|| format!("No native implementation for {}", manifest.id))?
            }
            ExtensionLanguage::Javascript | ExtensionLanguage::Typescript => {
                let permissions: HashSet<String> =
                    manifest.permissions.iter().cloned().collect();
                let vm = Arc::new(
                    JsVm::spawn(
                        manifest.id.clone(),
                        stored.payload.clone(),
                        permissions,
                        user_config,
                    )
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?,
                );
                let provider = Arc::new(JsProvider::new(vm));
                match manifest.kind {
                    ExtensionType::AnimeTorrentProvider => {
                        ProviderInstance::AnimeTorrent(provider)
                    }
                    ExtensionType::MangaProvider => ProviderInstance::Manga(provider),
                    ExtensionType::OnlinestreamProvider => {
                        ProviderInstance::Onlinestream(provider)
                    }
                    ExtensionType::CustomSource => ProviderInstance::CustomSource(provider),
                    ExtensionType::Plugin => ProviderInstance::Plugin,
                }
            }
        };

        self.loaded.write().insert(
            manifest.id.clone(),
            Arc::new(LoadedExtension {
                manifest: manifest.clone(),
                instance,
                semaphore: Arc::new(Semaphore::new(CALLS_PER_EXTENSION)),
                failures: AtomicU64::new(0),
            }),
        );
        self.events.send(WsEvent::ExtensionStatusChanged {
            id: manifest.id.clone(),
            status: "loaded".to_string(),
        });
        tracing::info!(id = %manifest.id, kind = ?manifest.kind, "Loaded extension");
        Ok(())
    }

    /// Rebuild one extension in place.
    pub async fn reload(&self, id: &str) -> Result<()> {
        let stored = self
            .db
            .extensions()
            .get(id)
            .await?
            .with_context(|| format!("Extension not installed: {id}"))?;
        anyhow::ensure!(stored.grant_state == GRANT_GRANTED, "Extension is pending grant");
        self.load_one(&stored).await
    }

    pub fn get(&self, id: &str) -> Option<Arc<LoadedExtension>> {
        self.loaded.read().get(id).cloned()
    }

    /// The anime torrent provider for an id, if loaded with that kind.
    pub fn anime_torrent_provider(
        &self,
        id: &str,
    ) -> Option<(Arc<LoadedExtension>, Arc<dyn provider::AnimeTorrentProvider>)> {
        let loaded = self.get(id)?;
        match &loaded.instance {
            ProviderInstance::AnimeTorrent(p) => Some((loaded.clone(), p.clone())),
            _ => None,
        }
    }

    pub fn manga_provider(
        &self,
        id: &str,
    ) -> Option<(Arc<LoadedExtension>, Arc<dyn provider::MangaProvider>)> {
        let loaded = self.get(id)?;
        match &loaded.instance {
            ProviderInstance::Manga(p) => Some((loaded.clone(), p.clone())),
            _ => None,
        }
    }

    pub fn onlinestream_provider(
        &self,
        id: &str,
    ) -> Option<(Arc<LoadedExtension>, Arc<dyn provider::OnlinestreamProvider>)> {
        let loaded = self.get(id)?;
        match &loaded.instance {
            ProviderInstance::Onlinestream(p) => Some((loaded.clone(), p.clone())),
            _ => None,
        }
    }

    pub fn custom_source(
        &self,
        id: &str,
    ) -> Option<(Arc<LoadedExtension>, Arc<dyn provider::CustomSourceProvider>)> {
        let loaded = self.get(id)?;
        match &loaded.instance {
            ProviderInstance::CustomSource(p) => Some((loaded.clone(), p.clone())),
            _ => None,
        }
    }

    /// Ids of loaded extensions of one kind.
    pub fn ids_of_kind(&self, kind: ExtensionType) -> Vec<String> {
        self.loaded
            .read()
            .values()
            .filter(|e| e.manifest.kind == kind)
            .map(|e| e.manifest.id.clone())
            .collect()
    }

    pub async fn status_of(&self, id: &str) -> Result<Option<ExtensionStatus>> {
        let loaded = self.get(id);
        if let Some(stored) = self.db.extensions().get(id).await? {
            let manifest: ExtensionManifest = serde_json::from_str(&stored.manifest)?;
            return Ok(Some(self.make_status(&manifest, &stored.grant_state, loaded)));
        }
        if let Some(l) = loaded {
            if l.manifest.is_builtin() {
                let manifest = l.manifest.clone();
                return Ok(Some(self.make_status(&manifest, GRANT_GRANTED, Some(l))));
            }
        }
        Ok(None)
    }

    pub async fn list_status(&self) -> Result<Vec<ExtensionStatus>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for stored in self.db.extensions().list().await? {
            let manifest: ExtensionManifest = match serde_json::from_str(&stored.manifest) {
                Ok(m) => m,
                Err(_) => continue,
            };
            seen.insert(manifest.id.clone());
            let loaded = self.get(&manifest.id);
            out.push(self.make_status(&manifest, &stored.grant_state, loaded));
        }
        for loaded in self.loaded.read().values() {
            if loaded.manifest.is_builtin() && !seen.contains(&loaded.manifest.id) {
                out.push(self.make_status(
                    &loaded.manifest,
                    GRANT_GRANTED,
                    Some(loaded.clone()),
                ));
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn make_status(
        &self,
        manifest: &ExtensionManifest,
        grant_state: &str,
        loaded: Option<Arc<LoadedExtension>>,
    ) -> ExtensionStatus {
        ExtensionStatus {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            kind: manifest.kind,
            language: manifest.language,
            loaded: loaded.is_some(),
            grant_state: grant_state.to_string(),
            failure_count: loaded.map(|l| l.failure_count()).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> ExtensionRegistry {
        let db = Database::connect_memory().await.unwrap();
        ExtensionRegistry::new(db, EventBus::new())
    }

    fn js_manifest(id: &str, permissions: Vec<&str>) -> ExtensionManifest {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "Test",
            "version": "1.0.0",
            "language": "js",
            "type": "anime-torrent-provider",
            "permissions": permissions,
            "payload": "function getLatest() { return [] }",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_builtin_is_registered() {
        let registry = registry().await;
        assert!(registry.anime_torrent_provider("animetosho").is_some());
    }

    #[tokio::test]
    async fn test_install_without_permissions_loads() {
        let registry = registry().await;
        let status = registry
            .install_manifest(js_manifest("simple", vec![]))
            .await
            .unwrap();
        assert_eq!(status.grant_state, GRANT_GRANTED);
        assert!(status.loaded);
        assert!(registry.anime_torrent_provider("simple").is_some());
    }

    #[tokio::test]
    async fn test_install_with_permissions_pends() {
        let registry = registry().await;
        let status = registry
            .install_manifest(js_manifest("needs-net", vec!["fetch:nyaa.si"]))
            .await
            .unwrap();
        assert_eq!(status.grant_state, GRANT_PENDING);
        assert!(!status.loaded);

        registry.grant("needs-net").await.unwrap();
        assert!(registry.anime_torrent_provider("needs-net").is_some());
    }

    #[tokio::test]
    async fn test_widened_permissions_require_regrant() {
        let registry = registry().await;
        registry
            .install_manifest(js_manifest("grow", vec![]))
            .await
            .unwrap();
        let status = registry
            .install_manifest(js_manifest("grow", vec!["fetch"]))
            .await
            .unwrap();
        assert_eq!(status.grant_state, GRANT_PENDING);
    }

    #[tokio::test]
    async fn test_uninstall_unloads() {
        let registry = registry().await;
        registry
            .install_manifest(js_manifest("gone", vec![]))
            .await
            .unwrap();
        registry.uninstall("gone").await.unwrap();
        assert!(registry.anime_torrent_provider("gone").is_none());
        assert!(registry.status_of("gone").await.unwrap().is_none());
    }
}
