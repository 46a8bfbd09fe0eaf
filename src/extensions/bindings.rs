//! Host bindings for sandboxed extensions
//!
//! Each VM thread installs a [HostEnv] in a thread local before evaluating
//! the payload; the native functions registered on the JS context read it
//! from there. Bindings enforce the granted permission set: a disallowed
//! call returns a structured error object, never the real result.

use std::cell::RefCell;
use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;

pub struct HostEnv {
    pub extension_id: String,
    /// Granted permissions, e.g. "fetch", "fetch:nyaa.si"
    pub permissions: HashSet<String>,
    pub user_config: serde_json::Value,
    pub http: reqwest::blocking::Client,
}

thread_local! {
    static HOST_ENV: RefCell<Option<HostEnv>> = const { RefCell::new(None) };
}

/// Install the environment for the current VM thread.
pub fn install(env: HostEnv) {
    HOST_ENV.with(|cell| *cell.borrow_mut() = Some(env));
}

pub fn with_env<R>(f: impl FnOnce(&HostEnv) -> R) -> Option<R> {
    HOST_ENV.with(|cell| cell.borrow().as_ref().map(f))
}

/// Whether the granted set allows fetching `url`. A bare "fetch" grant
/// allows any host; "fetch:<host>" grants are per-host.
pub fn fetch_allowed(permissions: &HashSet<String>, url: &str) -> bool {
    if permissions.contains("fetch") {
        return true;
    }
    let Some(host) = url::Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) else {
        return false;
    };
    permissions.contains(&format!("fetch:{host}"))
}

/// Blocking fetch used by the `$fetch` binding. Runs on the VM's own OS
/// thread, so blocking here never stalls the async runtime.
pub fn host_fetch(url: &str, options: &serde_json::Value) -> serde_json::Value {
    let denied = json!({
        "ok": false,
        "status": 0,
        "error": "permission denied",
    });

    let Some(result) = with_env(|env| {
        if !fetch_allowed(&env.permissions, url) {
            tracing::warn!(
                extension = %env.extension_id,
                url = url,
                "Extension fetch denied by permission set"
            );
            return denied.clone();
        }

        let method = options["method"].as_str().unwrap_or("GET").to_uppercase();
        let mut req = match method.as_str() {
            "POST" => env.http.post(url),
            "PUT" => env.http.put(url),
            "DELETE" => env.http.delete(url),
            _ => env.http.get(url),
        };
        if let Some(headers) = options["headers"].as_object() {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    req = req.header(k, v);
                }
            }
        }
        if let Some(body) = options["body"].as_str() {
            req = req.body(body.to_string());
        }

        match req.send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().unwrap_or_default();
                json!({ "ok": status < 400, "status": status, "body": body })
            }
            Err(e) => json!({ "ok": false, "status": 0, "error": e.to_string() }),
        }
    }) else {
        return denied;
    };
    result
}

/// `$log(level, message)` binding.
pub fn host_log(level: &str, message: &str) {
    let extension = with_env(|env| env.extension_id.clone()).unwrap_or_default();
    match level {
        "error" => tracing::error!(extension = %extension, "{message}"),
        "warn" => tracing::warn!(extension = %extension, "{message}"),
        "debug" => tracing::debug!(extension = %extension, "{message}"),
        _ => tracing::info!(extension = %extension, "{message}"),
    }
}

/// `$getUserConfig()` binding.
pub fn host_user_config() -> serde_json::Value {
    with_env(|env| env.user_config.clone()).unwrap_or(serde_json::Value::Null)
}

/// Shared blocking client for VM threads.
pub fn blocking_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent("kanata-extension")
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_allowed() {
        let mut perms = HashSet::new();
        assert!(!fetch_allowed(&perms, "https://nyaa.si/rss"));

        perms.insert("fetch:nyaa.si".to_string());
        assert!(fetch_allowed(&perms, "https://nyaa.si/rss"));
        assert!(!fetch_allowed(&perms, "https://example.com/"));

        perms.insert("fetch".to_string());
        assert!(fetch_allowed(&perms, "https://example.com/"));
    }

    #[test]
    fn test_fetch_denied_without_env() {
        let result = host_fetch("https://example.com", &serde_json::Value::Null);
        assert_eq!(result["ok"], false);
        assert_eq!(result["error"], "permission denied");
    }
}
