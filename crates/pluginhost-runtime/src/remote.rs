//! Downloads and dynamically loads plugin bundles distributed separately
//! from the host binary.
//!
//! This is the Rust-native reading of "fetch a remote script, inject it,
//! read a global off it": the bundle is a native dynamic library
//! (`.so`/`.dylib`/`.dll`) built against the same `pluginhost-core` types as
//! the host, downloaded over HTTP and opened with `libloading`. The
//! exported constructor plays the role the global object's property played
//! in a script-tag world. Tearing a plugin down drops the `Library` handle
//! — the nearest analogue to removing the `<script>` element — though, like
//! a JS engine's module cache, the OS may keep the library's pages resident
//! after that; this is expected, not a leak to chase.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pluginhost_core::error::PluginError;
use pluginhost_core::manifest::{LoadedModule, PluginManifest};
use tokio::time::sleep;
use tracing::{info, warn};

/// A symbol exported by a plugin bundle, named by replacing the dots in a
/// dotted global path with underscores (`"acme.widgets"` ->
/// `"acme_widgets"`), mirroring how a C-style symbol table can't hold dots.
fn symbol_name(exposed_global: &str) -> String {
    exposed_global.replace('.', "_")
}

/// Where to fetch a plugin bundle from and what symbol to resolve out of it
/// once loaded.
#[derive(Debug, Clone)]
pub struct RemotePluginSpec {
    pub plugin_name: String,
    pub url: String,
    pub exposed_global: String,
}

struct CachedRemote {
    #[allow(dead_code)] // kept alive only for its Drop
    library: Arc<libloading::Library>,
    manifest: PluginManifest,
}

/// Type of the constructor every plugin bundle must export, named per
/// [`symbol_name`]. Bundles are expected to be built against the same
/// `pluginhost-core` version as the host; this is an ABI assumption this
/// loader does not — and cannot — verify.
type PluginEntryFn = unsafe fn() -> PluginManifest;

/// Downloads, opens, and caches remote plugin bundles.
pub struct RemoteLoader {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CachedRemote>>,
    fetch_timeout: Duration,
    max_retries: u32,
}

impl RemoteLoader {
    pub fn new(fetch_timeout: Duration, max_retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .expect("failed to build reqwest client");
        Self { client, cache: Mutex::new(HashMap::new()), fetch_timeout, max_retries }
    }

    /// Loads the bundle named by `spec`, serving from cache on a repeat
    /// call with the same URL. Retries the download with exponential
    /// backoff up to `max_retries` times before giving up.
    pub async fn load(&self, spec: &RemotePluginSpec) -> Result<LoadedModule, PluginError> {
        if let Some(cached_manifest) = self.cached_manifest(&spec.url) {
            info!(plugin = %spec.plugin_name, url = %spec.url, "serving remote plugin from cache");
            return Ok(LoadedModule::new(cached_manifest));
        }

        let bytes = self.fetch_with_retry(spec).await?;
        let (library, manifest) = self.open_bundle(spec, bytes).await?;

        let manifest_clone = manifest.clone();
        self.cache.lock().insert(spec.url.clone(), CachedRemote { library: Arc::clone(&library), manifest });
        Ok(LoadedModule::with_keep_alive(manifest_clone, library))
    }

    /// Drops the cached library handle for `url`, if any.
    pub fn unload(&self, url: &str) {
        self.cache.lock().remove(url);
    }

    fn cached_manifest(&self, url: &str) -> Option<PluginManifest> {
        self.cache.lock().get(url).map(|c| c.manifest.clone())
    }

    async fn fetch_with_retry(&self, spec: &RemotePluginSpec) -> Result<Vec<u8>, PluginError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(spec).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt.min(6)));
                    warn!(plugin = %spec.plugin_name, attempt, ?backoff, %err, "retrying remote plugin fetch");
                    sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, spec: &RemotePluginSpec) -> Result<Vec<u8>, PluginError> {
        let response = self.client.get(&spec.url).send().await.map_err(|e| remote_err(spec, e.to_string(), None))?;
        if !response.status().is_success() {
            return Err(remote_err(spec, format!("HTTP {}", response.status()), None));
        }
        response.bytes().await.map(|b| b.to_vec()).map_err(|e| remote_err(spec, e.to_string(), None))
    }

    async fn open_bundle(
        &self,
        spec: &RemotePluginSpec,
        bytes: Vec<u8>,
    ) -> Result<(Arc<libloading::Library>, PluginManifest), PluginError> {
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = tempfile::Builder::new()
                .prefix("pluginhost-remote-")
                .tempfile()
                .map_err(|e| remote_err(&spec, e.to_string(), None))?;
            use std::io::Write;
            file.write_all(&bytes).map_err(|e| remote_err(&spec, e.to_string(), None))?;

            // SAFETY: loading an arbitrary dynamic library is inherently
            // unsafe; the caller is trusting `spec.url` the same way a host
            // trusts any remote code it chooses to execute.
            let library = unsafe { libloading::Library::new(file.path()) }
                .map_err(|e| remote_err(&spec, format!("failed to open bundle: {e}"), None))?;

            let symbol = symbol_name(&spec.exposed_global);
            // SAFETY: relies on the bundle exporting a symbol of type
            // `PluginEntryFn` under `symbol`; a mismatched signature is
            // undefined behavior the loader has no way to check for.
            let manifest = unsafe {
                let ctor: libloading::Symbol<PluginEntryFn> = library
                    .get(symbol.as_bytes())
                    .map_err(|e| remote_err(&spec, format!("missing export '{symbol}': {e}"), None))?;
                ctor()
            };

            Ok((Arc::new(library), manifest))
        })
        .await
        .map_err(|e| remote_err(&spec, format!("bundle loading task panicked: {e}"), None))?
    }

    pub fn timeout(&self) -> Duration {
        self.fetch_timeout
    }
}

fn remote_err(spec: &RemotePluginSpec, message: String, cause: Option<std::sync::Arc<dyn std::error::Error + Send + Sync>>) -> PluginError {
    PluginError::RemoteLoadError { plugin_name: spec.plugin_name.clone(), url: spec.url.clone(), message, cause }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_name_replaces_dots() {
        assert_eq!(symbol_name("acme.widgets.core"), "acme_widgets_core");
        assert_eq!(symbol_name("simple"), "simple");
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_as_remote_load_error() {
        let loader = RemoteLoader::new(Duration::from_millis(200), 0);
        let spec = RemotePluginSpec {
            plugin_name: "demo".into(),
            url: "http://127.0.0.1:1/does-not-exist".into(),
            exposed_global: "demo.plugin".into(),
        };
        let err = loader.load(&spec).await.unwrap_err();
        assert_eq!(err.name(), "RemoteLoadError");
    }
}
