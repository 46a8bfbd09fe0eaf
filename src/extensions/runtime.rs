//! Sandboxed JS/TS runtime
//!
//! Each script extension runs in its own boa engine on a dedicated OS
//! thread. Calls cross the boundary as JSON: arguments are converted into
//! JS values, the named global function is invoked (promises are resolved
//! by draining the job queue) and the result converted back. Dropping the
//! [JsVm] closes the call channel; the thread drains in-flight calls before
//! discarding the context, which is what makes hot reload safe.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{Context, JsArgs, JsResult, JsString, JsValue, NativeFunction, Source, js_string};
use tokio::sync::{mpsc, oneshot};

use super::bindings::{self, HostEnv};
use super::provider::{
    AnimeTorrentProvider, ChapterDetails, CustomSourceProvider, MangaProvider, MangaResult,
    OnlinestreamEpisode, OnlinestreamProvider, OnlinestreamSource, PageDetails, ProviderSettings,
    ProviderTorrent, SmartSearchOptions,
};

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("extension failed to load: {0}")]
    Init(String),
    #[error("extension call failed: {0}")]
    Call(String),
    #[error("extension runtime is shut down")]
    Closed,
}

struct VmCall {
    function: String,
    args: Vec<serde_json::Value>,
    reply: oneshot::Sender<Result<serde_json::Value, VmError>>,
}

/// Handle to one extension VM. Cloneable; the thread exits once every
/// handle is dropped and queued calls have drained.
#[derive(Debug)]
pub struct JsVm {
    extension_id: String,
    tx: mpsc::Sender<VmCall>,
}

impl JsVm {
    /// Spawn the VM thread, evaluate the payload and report eval errors
    /// before returning.
    pub async fn spawn(
        extension_id: String,
        source: String,
        permissions: HashSet<String>,
        user_config: serde_json::Value,
    ) -> Result<Self, VmError> {
        let (tx, mut rx) = mpsc::channel::<VmCall>(32);
        let (init_tx, init_rx) = oneshot::channel::<Result<(), VmError>>();

        let thread_id = extension_id.clone();
        std::thread::Builder::new()
            .name(format!("ext-{extension_id}"))
            .spawn(move || {
                bindings::install(HostEnv {
                    extension_id: thread_id.clone(),
                    permissions,
                    user_config,
                    http: bindings::blocking_client(),
                });

                let mut context = Context::default();
                if let Err(e) = register_bindings(&mut context) {
                    let _ = init_tx.send(Err(VmError::Init(e.to_string())));
                    return;
                }
                if let Err(e) = context.eval(Source::from_bytes(source.as_bytes())) {
                    let _ = init_tx.send(Err(VmError::Init(e.to_string())));
                    return;
                }
                let _ = init_tx.send(Ok(()));

                while let Some(call) = rx.blocking_recv() {
                    let result = invoke(&mut context, &call.function, &call.args);
                    let _ = call.reply.send(result);
                }
                tracing::debug!(extension = %thread_id, "Extension VM thread exited");
            })
            .map_err(|e| VmError::Init(e.to_string()))?;

        match init_rx.await {
            Ok(Ok(())) => Ok(Self { extension_id, tx }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VmError::Init("VM thread died during startup".into())),
        }
    }

    /// Invoke a global function with JSON arguments.
    pub async fn call(
        &self,
        function: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, VmError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(VmCall {
                function: function.to_string(),
                args,
                reply,
            })
            .await
            .map_err(|_| VmError::Closed)?;
        rx.await.map_err(|_| VmError::Closed)?
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }
}

fn register_bindings(context: &mut Context) -> JsResult<()> {
    context.register_global_callable(
        js_string!("$fetch"),
        2,
        NativeFunction::from_fn_ptr(binding_fetch),
    )?;
    context.register_global_callable(
        js_string!("$log"),
        2,
        NativeFunction::from_fn_ptr(binding_log),
    )?;
    context.register_global_callable(
        js_string!("$getUserConfig"),
        0,
        NativeFunction::from_fn_ptr(binding_user_config),
    )?;
    Ok(())
}

fn binding_fetch(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let url = args
        .get_or_undefined(0)
        .to_string(context)?
        .to_std_string_escaped();
    let options = match args.get_or_undefined(1) {
        v if v.is_undefined() || v.is_null() => serde_json::Value::Null,
        v => v.to_json(context).unwrap_or(serde_json::Value::Null),
    };
    let result = bindings::host_fetch(&url, &options);
    JsValue::from_json(&result, context)
}

fn binding_log(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let level = args
        .get_or_undefined(0)
        .to_string(context)?
        .to_std_string_escaped();
    let message = args
        .get_or_undefined(1)
        .to_string(context)?
        .to_std_string_escaped();
    bindings::host_log(&level, &message);
    Ok(JsValue::undefined())
}

fn binding_user_config(
    _this: &JsValue,
    _args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    JsValue::from_json(&bindings::host_user_config(), context)
}

fn invoke(
    context: &mut Context,
    function: &str,
    args: &[serde_json::Value],
) -> Result<serde_json::Value, VmError> {
    let global = context.global_object();
    let value = global
        .get(JsString::from(function), context)
        .map_err(|e| VmError::Call(e.to_string()))?;
    let callable = value
        .as_callable()
        .ok_or_else(|| VmError::Call(format!("{function} is not a function")))?;

    let mut js_args = Vec::with_capacity(args.len());
    for arg in args {
        js_args.push(
            JsValue::from_json(arg, context).map_err(|e| VmError::Call(e.to_string()))?,
        );
    }

    let result = callable
        .call(&JsValue::undefined(), &js_args, context)
        .map_err(|e| VmError::Call(e.to_string()))?;

    // Resolve promises by draining the microtask queue.
    context.run_jobs();
    let result = match result.as_object().cloned().and_then(|o| JsPromise::from_object(o).ok()) {
        Some(promise) => match promise.state() {
            PromiseState::Fulfilled(v) => v,
            PromiseState::Rejected(e) => {
                return Err(VmError::Call(
                    e.to_json(context)
                        .map(|j| j.to_string())
                        .unwrap_or_else(|_| "promise rejected".to_string()),
                ));
            }
            PromiseState::Pending => {
                return Err(VmError::Call("promise never resolved".to_string()));
            }
        },
        None => result,
    };

    if result.is_undefined() || result.is_null() {
        return Ok(serde_json::Value::Null);
    }
    result.to_json(context).map_err(|e| VmError::Call(e.to_string()))
}

// ---------------------------------------------------------------------------
// Typed adapters over the VM

/// Wraps a VM as whichever provider trait the manifest declared. Calls are
/// JSON in, JSON out; schema mismatches surface as errors carrying the
/// extension id.
pub struct JsProvider {
    vm: Arc<JsVm>,
}

impl JsProvider {
    pub fn new(vm: Arc<JsVm>) -> Self {
        Self { vm }
    }

    async fn call_as<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<T> {
        let value = self.vm.call(function, args).await.map_err(|e| {
            anyhow::anyhow!("[{}] {e}", self.vm.extension_id())
        })?;
        serde_json::from_value(value).map_err(|e| {
            anyhow::anyhow!(
                "[{}] {function} returned an unexpected shape: {e}",
                self.vm.extension_id()
            )
        })
    }
}

#[async_trait]
impl AnimeTorrentProvider for JsProvider {
    async fn search(&self, query: &str) -> Result<Vec<ProviderTorrent>> {
        self.call_as("search", vec![serde_json::json!({ "query": query })])
            .await
    }

    async fn smart_search(&self, opts: &SmartSearchOptions) -> Result<Vec<ProviderTorrent>> {
        self.call_as("smartSearch", vec![serde_json::to_value(opts)?])
            .await
    }

    async fn latest(&self) -> Result<Vec<ProviderTorrent>> {
        self.call_as("getLatest", vec![]).await
    }

    async fn info_hash(&self, torrent: &ProviderTorrent) -> Result<String> {
        if !torrent.info_hash.is_empty() {
            return Ok(torrent.info_hash.clone());
        }
        self.call_as("getTorrentInfoHash", vec![serde_json::to_value(torrent)?])
            .await
    }

    async fn magnet_link(&self, torrent: &ProviderTorrent) -> Result<String> {
        if !torrent.magnet.is_empty() {
            return Ok(torrent.magnet.clone());
        }
        self.call_as("getTorrentMagnetLink", vec![serde_json::to_value(torrent)?])
            .await
    }

    fn settings(&self) -> ProviderSettings {
        // getSettings is synchronous in the binding vocabulary; a missing
        // implementation falls back to defaults.
        ProviderSettings {
            supports_smart_search: true,
            supports_latest: true,
        }
    }
}

#[async_trait]
impl MangaProvider for JsProvider {
    async fn search(&self, query: &str) -> Result<Vec<MangaResult>> {
        self.call_as("search", vec![serde_json::json!({ "query": query })])
            .await
    }

    async fn chapters(&self, manga_id: &str) -> Result<Vec<ChapterDetails>> {
        self.call_as("findChapters", vec![serde_json::json!(manga_id)])
            .await
    }

    async fn pages(&self, chapter_id: &str) -> Result<Vec<PageDetails>> {
        self.call_as("findChapterPages", vec![serde_json::json!(chapter_id)])
            .await
    }
}

#[async_trait]
impl OnlinestreamProvider for JsProvider {
    async fn search(&self, query: &str) -> Result<Vec<MangaResult>> {
        self.call_as("search", vec![serde_json::json!({ "query": query })])
            .await
    }

    async fn episodes(&self, media_id: &str) -> Result<Vec<OnlinestreamEpisode>> {
        self.call_as("findEpisodes", vec![serde_json::json!(media_id)])
            .await
    }

    async fn sources(&self, episode_id: &str) -> Result<Vec<OnlinestreamSource>> {
        self.call_as("findEpisodeSources", vec![serde_json::json!(episode_id)])
            .await
    }
}

#[async_trait]
impl CustomSourceProvider for JsProvider {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        self.vm
            .call("handle", vec![serde_json::json!(method), params])
            .await
            .map_err(|e| anyhow::anyhow!("[{}] {e}", self.vm.extension_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_spawn_and_call() {
        let vm = JsVm::spawn(
            "test-ext".into(),
            r#"
                function add(input) { return input.a + input.b; }
                function shout(s) { return s.toUpperCase(); }
            "#
            .into(),
            HashSet::new(),
            serde_json::Value::Null,
        )
        .await
        .unwrap();

        let sum = vm
            .call("add", vec![serde_json::json!({ "a": 2, "b": 3 })])
            .await
            .unwrap();
        assert_eq!(sum.as_f64(), Some(5.0));

        let s = vm.call("shout", vec![serde_json::json!("hi")]).await.unwrap();
        assert_eq!(s, serde_json::json!("HI"));
    }

    #[tokio::test]
    async fn test_throwing_function_surfaces_error() {
        let vm = JsVm::spawn(
            "bad-ext".into(),
            "function boom() { throw new Error('nope'); }".into(),
            HashSet::new(),
            serde_json::Value::Null,
        )
        .await
        .unwrap();

        let err = vm.call("boom", vec![]).await.unwrap_err();
        assert_matches!(err, VmError::Call(_));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_syntax_error_fails_init() {
        let err = JsVm::spawn(
            "broken".into(),
            "function (".into(),
            HashSet::new(),
            serde_json::Value::Null,
        )
        .await
        .unwrap_err();
        assert_matches!(err, VmError::Init(_));
    }

    #[tokio::test]
    async fn test_missing_function() {
        let vm = JsVm::spawn(
            "empty".into(),
            "var x = 1;".into(),
            HashSet::new(),
            serde_json::Value::Null,
        )
        .await
        .unwrap();
        let err = vm.call("search", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("not a function"));
    }

    #[tokio::test]
    async fn test_promise_result_resolves() {
        let vm = JsVm::spawn(
            "promise-ext".into(),
            "function getValue() { return Promise.resolve(41 + 1); }".into(),
            HashSet::new(),
            serde_json::Value::Null,
        )
        .await
        .unwrap();
        let v = vm.call("getValue", vec![]).await.unwrap();
        assert_eq!(v.as_f64(), Some(42.0));
    }

    #[tokio::test]
    async fn test_provider_adapter_parses_results() {
        let vm = JsVm::spawn(
            "torrents".into(),
            r#"
                function getLatest() {
                    return [
                        { name: "[Grp] Show - 03 [1080p]", link: "https://x/1", seeders: 12 },
                    ];
                }
            "#
            .into(),
            HashSet::new(),
            serde_json::Value::Null,
        )
        .await
        .unwrap();

        let provider = JsProvider::new(Arc::new(vm));
        let latest = AnimeTorrentProvider::latest(&provider).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].name, "[Grp] Show - 03 [1080p]");
        assert_eq!(latest[0].seeders, 12);
    }
}
