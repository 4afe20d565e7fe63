//! The plugin manager: the operation surface a host drives — register,
//! load, create/destroy mounted components, unload, unregister — plus the
//! global hooks and per-plugin concurrency guards those operations share.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, Shared};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use pluginhost_core::component::EntryComponent;
use pluginhost_core::context::PluginContext;
use pluginhost_core::error::{InProgressOperation, PluginError, PluginResult};
use pluginhost_core::manifest::{PluginDescriptor, PluginManifest};
use pluginhost_core::registry::{PluginMetadataRecord, PluginRegistry};
use pluginhost_core::scope::{Scope, ScopeFactory, ServiceToken};
use pluginhost_core::state::PluginState;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PluginSystemConfig;

#[cfg(feature = "remote")]
use crate::remote::{RemoteLoader, RemotePluginSpec};

/// A scope with nothing registered, used as the default root a
/// [`PluginManager`] parents every plugin's isolated scope to when the host
/// doesn't supply its own.
struct NullScope;
impl Scope for NullScope {
    fn resolve(&self, _token: &ServiceToken) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        None
    }
}

type GlobalHook = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&str, &PluginError) + Send + Sync>;

/// An in-flight `load`/`unregister` shared by every caller racing the same
/// plugin name, so they all observe the same outcome instead of the second
/// caller rejecting with `PluginOperationInProgressError`.
type SharedOp = Shared<BoxFuture<'static, PluginResult<()>>>;

#[derive(Default)]
struct GlobalHooks {
    before_load: Vec<GlobalHook>,
    after_load: Vec<GlobalHook>,
    before_unload: Vec<GlobalHook>,
    after_unload: Vec<GlobalHook>,
    on_error: Vec<ErrorHook>,
}

/// Read-only counters for observability; never consulted to gate
/// behaviour.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ManagerStats {
    pub total_loads: u64,
    pub successful_loads: u64,
    pub total_unloads: u64,
    pub total_activations: u64,
    pub failed_operations: u64,
}

/// Derived, read-only view of a plugin for dashboards — assembled from the
/// registry's state/metadata/manifest rather than stored as its own thing.
/// Neither `Debug` nor `Serialize`: `manifest` carries a live
/// `entry_component` factory that can't implement either.
#[derive(Clone)]
pub struct PluginInfo {
    pub name: String,
    pub state: PluginState,
    pub manifest: Option<PluginManifest>,
    pub metadata: PluginMetadataRecord,
}

/// Orchestrates the plugin lifecycle on top of a [`PluginRegistry`].
pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    host_scope: Arc<dyn Scope>,
    config: PluginSystemConfig,
    #[cfg(feature = "remote")]
    remote_loader: Arc<RemoteLoader>,
    #[cfg(feature = "remote")]
    remote_urls: SyncMutex<HashMap<String, String>>,
    in_flight_loads: SyncMutex<HashMap<String, SharedOp>>,
    in_flight_unloads: SyncMutex<HashMap<String, SharedOp>>,
    creating_component: SyncMutex<HashSet<String>>,
    hooks: SyncRwLock<GlobalHooks>,
    stats: SyncMutex<ManagerStats>,
    disposed: AtomicBool,
    /// Lets the `load`/`unregister` dedup paths (and `register`'s
    /// `auto_load`) spawn work that calls back into the manager without
    /// requiring every caller to pass an owned `Arc`.
    self_weak: Weak<PluginManager>,
}

impl PluginManager {
    pub fn new(config: PluginSystemConfig) -> Arc<Self> {
        Self::with_host_scope(config, Arc::new(NullScope))
    }

    pub fn with_host_scope(config: PluginSystemConfig, host_scope: Arc<dyn Scope>) -> Arc<Self> {
        #[cfg(feature = "remote")]
        let remote_loader = Arc::new(RemoteLoader::new(
            Duration::from_millis(config.remote_fetch_timeout_ms),
            config.remote_max_retries,
        ));
        Arc::new_cyclic(|weak| Self {
            registry: Arc::new(PluginRegistry::new()),
            host_scope,
            config,
            #[cfg(feature = "remote")]
            remote_loader,
            #[cfg(feature = "remote")]
            remote_urls: SyncMutex::new(HashMap::new()),
            in_flight_loads: SyncMutex::new(HashMap::new()),
            in_flight_unloads: SyncMutex::new(HashMap::new()),
            creating_component: SyncMutex::new(HashSet::new()),
            hooks: SyncRwLock::new(GlobalHooks::default()),
            stats: SyncMutex::new(ManagerStats::default()),
            disposed: AtomicBool::new(false),
            self_weak: weak.clone(),
        })
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats.lock().clone()
    }

    pub async fn plugin_states(&self) -> HashMap<String, PluginState> {
        let mut out = HashMap::new();
        for name in self.registry.plugin_names().await {
            if let Ok(state) = self.registry.state(&name).await {
                out.insert(name, state);
            }
        }
        out
    }

    pub async fn plugin_count(&self) -> usize {
        self.registry.plugin_count().await
    }

    pub fn on_before_load(&self, hook: GlobalHook) {
        self.hooks.write().before_load.push(hook);
    }

    pub fn on_after_load(&self, hook: GlobalHook) {
        self.hooks.write().after_load.push(hook);
    }

    pub fn on_before_unload(&self, hook: GlobalHook) {
        self.hooks.write().before_unload.push(hook);
    }

    pub fn on_after_unload(&self, hook: GlobalHook) {
        self.hooks.write().after_unload.push(hook);
    }

    pub fn on_error(&self, hook: ErrorHook) {
        self.hooks.write().on_error.push(hook);
    }

    /// Registers `descriptor`. If `descriptor.auto_load` is set, kicks off
    /// `load` in the background and discards the resulting future — errors
    /// still surface through the state stream exactly like a caller-driven
    /// `load` failure would.
    pub async fn register(&self, descriptor: PluginDescriptor) -> PluginResult<()> {
        let auto_load = descriptor.auto_load;
        let name = descriptor.name.clone();
        self.registry.register(descriptor).await?;
        if auto_load {
            if let Some(manager) = self.self_weak.upgrade() {
                tokio::spawn(async move {
                    if let Err(err) = manager.load(&name).await {
                        debug!(plugin = %name, %err, "auto_load failed, see state stream for details");
                    }
                });
            }
        }
        Ok(())
    }

    /// Registers a plugin whose bundle is fetched over HTTP rather than
    /// linked into the host; `load` then downloads and opens it on demand.
    #[cfg(feature = "remote")]
    pub async fn register_remote(
        &self,
        spec: RemotePluginSpec,
        config: serde_json::Value,
        service_whitelist: Vec<String>,
    ) -> PluginResult<()> {
        let remote_loader = Arc::clone(&self.remote_loader);
        let name = spec.plugin_name.clone();
        let url = spec.url.clone();
        let load = Arc::new(move || {
            let remote_loader = Arc::clone(&remote_loader);
            let spec = spec.clone();
            Box::pin(async move { remote_loader.load(&spec).await }) as BoxFuture<'static, _>
        });
        let descriptor = PluginDescriptor::new(name.clone(), load)
            .with_config(config)
            .with_service_whitelist(service_whitelist);
        self.register(descriptor).await?;
        self.remote_urls.lock().insert(name, url);
        Ok(())
    }

    /// `unregister` plus evicting the downloaded bundle from the remote
    /// loader's cache, so a later `register_remote` for the same URL
    /// re-fetches rather than reusing a stale library handle.
    #[cfg(feature = "remote")]
    pub async fn unregister_remote(&self, name: &str) -> PluginResult<()> {
        self.unregister(name).await?;
        if let Some(url) = self.remote_urls.lock().remove(name) {
            self.remote_loader.unload(&url);
        }
        Ok(())
    }

    /// Loads every name in `names`, running at most
    /// [`PluginSystemConfig::max_concurrent_loads`] loads at a time.
    /// Returns one result per input name, in completion order rather than
    /// input order.
    pub async fn load_many(&self, names: Vec<String>) -> Vec<(String, PluginResult<()>)> {
        let max_concurrent = self.config.max_concurrent_loads.max(1);
        stream::iter(names.into_iter().map(|name| async move {
            let result = self.load(&name).await;
            (name, result)
        }))
        .buffer_unordered(max_concurrent)
        .collect()
        .await
    }

    /// Loads a plugin: evaluates its descriptor, builds its isolated scope
    /// and context, then runs `on_load`. A no-op if already `Loaded` or
    /// `Active`. Rejects a plugin currently `Unloading` rather than queuing
    /// behind it. Any caller racing an already in-flight `load` for the
    /// same name awaits that same operation and observes the same result,
    /// rather than rejecting outright.
    #[instrument(skip(self), fields(plugin = %name))]
    pub async fn load(&self, name: &str) -> PluginResult<()> {
        let current = self.registry.state(name).await?;
        match current {
            PluginState::Loaded | PluginState::Active => return Ok(()),
            PluginState::Unloading => {
                return Err(PluginError::PluginStateError { plugin_name: name.to_string(), state: current });
            }
            _ => {}
        }

        let shared = self.share_op(&self.in_flight_loads, name, |manager, name| async move {
            manager.stats.lock().total_loads += 1;
            manager.run_global_hook_set(&manager.hooks.read().before_load, &name);

            let result = manager.load_inner(&name).await;
            match &result {
                Ok(()) => {
                    manager.stats.lock().successful_loads += 1;
                    manager.run_global_hook_set(&manager.hooks.read().after_load, &name);
                }
                Err(err) => {
                    manager.stats.lock().failed_operations += 1;
                    let _ = manager.registry.record_error(&name, err).await;
                    manager.run_error_hooks(&name, err);
                }
            }
            result
        });
        shared.await
    }

    async fn load_inner(&self, name: &str) -> PluginResult<()> {
        self.transition(name, PluginState::Loading).await?;
        let descriptor = self
            .registry
            .descriptor_of(name)
            .await
            .ok_or_else(|| PluginError::PluginNotFoundError { plugin_name: name.to_string() })?;

        let load_timeout_ms = self.resolve_load_timeout_ms(&descriptor);
        let module = self.run_hook_with_timeout(name, "load", load_timeout_ms, (descriptor.load)()).await?;

        if self.config.debug_options.validate_manifests && module.manifest.name != name {
            warn!(plugin = %name, manifest_name = %module.manifest.name, "manifest name does not match registered name");
            if self.config.debug_options.throw_on_warnings {
                return Err(PluginError::PluginLoadError {
                    plugin_name: name.to_string(),
                    message: format!("manifest name '{}' does not match registered name", module.manifest.name),
                    cause: None,
                });
            }
        }

        let whitelist = Arc::new(self.merged_whitelist(&descriptor));
        let context = PluginContext::with_scope(name.to_string(), whitelist, Some(Arc::clone(&self.host_scope)));
        let scope = ScopeFactory::create(name, Arc::clone(&self.host_scope), Arc::clone(&context));

        let hook_timeout_ms = self.config.lifecycle_hook_timeout_ms;
        let lifecycle_component = (module.manifest.entry_component)();
        self.run_hook_with_timeout(name, "on_load", hook_timeout_ms, lifecycle_component.on_load(&context)).await?;

        self.registry.set_module(name, module).await?;
        self.registry.set_scope(name, scope).await?;
        self.registry.set_context(name, Arc::clone(&context)).await?;
        self.registry.set_lifecycle_component(name, lifecycle_component).await?;
        self.transition(name, PluginState::Loaded).await?;
        info!(plugin = %name, "plugin loaded");
        Ok(())
    }

    /// `defaultAllowedServices` merged with the plugin's own
    /// `service_whitelist`, de-duplicated; this is the whitelist a
    /// plugin's [`PluginContext`] actually enforces.
    fn merged_whitelist(&self, descriptor: &PluginDescriptor) -> Vec<String> {
        let mut merged = self.config.default_allowed_services.clone();
        for service in &descriptor.service_whitelist {
            if !merged.contains(service) {
                merged.push(service.clone());
            }
        }
        merged
    }

    /// Ensures `name` is loaded, then instantiates a fresh mount-time
    /// component and runs `on_activate` on it. Guarded against running
    /// concurrently with [`PluginManager::unregister`] for the same name.
    /// On success the plugin is `Active` and carries a mounted component;
    /// see [`PluginManager::deactivate_component`] for the reverse.
    pub async fn create_component(&self, name: &str) -> PluginResult<Arc<dyn EntryComponent>> {
        if self.registry.state(name).await? == PluginState::Registered {
            self.load(name).await?;
        }
        if !self.creating_component.lock().insert(name.to_string()) {
            return Err(PluginError::PluginOperationInProgressError {
                plugin_name: name.to_string(),
                operation: InProgressOperation::Creating,
            });
        }
        let _ = self.registry.set_creating_component(name, true).await;
        let result = self.create_component_inner(name).await;
        self.creating_component.lock().remove(name);
        let _ = self.registry.set_creating_component(name, false).await;
        result
    }

    async fn create_component_inner(&self, name: &str) -> PluginResult<Arc<dyn EntryComponent>> {
        let manifest = self
            .registry
            .manifest_of(name)
            .await
            .ok_or_else(|| PluginError::PluginNotFoundError { plugin_name: name.to_string() })?;
        let context = self
            .registry
            .context_of(name)
            .await
            .ok_or_else(|| PluginError::PluginNotFoundError { plugin_name: name.to_string() })?;

        let component = (manifest.entry_component)();
        let hook_timeout_ms = self.config.lifecycle_hook_timeout_ms;
        self.run_hook_with_timeout(name, "on_activate", hook_timeout_ms, component.on_activate(&context)).await?;

        let current = self.registry.state(name).await?;
        if current == PluginState::Loaded {
            self.transition(name, PluginState::Active).await?;
        }
        self.registry.set_has_component(name, true).await?;
        self.stats.lock().total_activations += 1;
        Ok(component)
    }

    /// Runs `on_deactivate` on a previously created mount-time component and
    /// returns the plugin from `Active` back to `Loaded` — the mirror of
    /// [`PluginManager::create_component`]'s `Loaded` → `Active` step. A
    /// no-op on the state if the plugin isn't currently `Active` (e.g. it
    /// was already unloaded out from under the caller).
    pub async fn deactivate_component(&self, name: &str, component: &Arc<dyn EntryComponent>) -> PluginResult<()> {
        let context = self
            .registry
            .context_of(name)
            .await
            .ok_or_else(|| PluginError::PluginNotFoundError { plugin_name: name.to_string() })?;
        let hook_timeout_ms = self.config.lifecycle_hook_timeout_ms;
        self.run_hook_with_timeout(name, "on_deactivate", hook_timeout_ms, component.on_deactivate(&context)).await?;

        if self.registry.state(name).await? == PluginState::Active {
            self.transition(name, PluginState::Loaded).await?;
        }
        self.registry.set_has_component(name, false).await
    }

    /// Convenience for the common "load then mount" sequence: `load`
    /// followed by `create_component`, in order.
    pub async fn load_and_activate(&self, name: &str) -> PluginResult<Arc<dyn EntryComponent>> {
        self.load(name).await?;
        self.create_component(name).await
    }

    /// Unloads a plugin: runs `on_destroy` on its lifecycle component, then
    /// tears down its scope and context. A no-op if already `Unloaded`. Does
    /// not remove the plugin's registry entry — see
    /// [`PluginManager::unregister`] for that.
    pub async fn unload(&self, name: &str) -> PluginResult<()> {
        let current = self.registry.state(name).await?;
        if current == PluginState::Unloaded {
            return Ok(());
        }

        self.run_global_hook_set(&self.hooks.read().before_unload, name);
        let result = self.unload_inner(name).await;
        match &result {
            Ok(()) => {
                self.stats.lock().total_unloads += 1;
                self.run_global_hook_set(&self.hooks.read().after_unload, name);
            }
            Err(err) => {
                self.stats.lock().failed_operations += 1;
                let _ = self.registry.record_error(name, err).await;
                self.run_error_hooks(name, err);
            }
        }
        result
    }

    #[instrument(skip(self), fields(plugin = %name))]
    async fn unload_inner(&self, name: &str) -> PluginResult<()> {
        self.transition(name, PluginState::Unloading).await?;

        let hook_timeout_ms = self.config.lifecycle_hook_timeout_ms;
        if let Some(component) = self.registry.lifecycle_component_of(name).await {
            if let Some(context) = self.registry.context_of(name).await {
                self.run_hook_with_timeout(name, "on_destroy", hook_timeout_ms, component.on_destroy(&context)).await?;
            }
        }

        self.registry.clear_module(name).await?;
        self.transition(name, PluginState::Unloaded).await?;
        info!(plugin = %name, "plugin unloaded");
        Ok(())
    }

    /// Removes a plugin's entry entirely. Always succeeds in removing the
    /// bookkeeping entry even when unload itself fails along the way —
    /// sub-teardown errors are logged and swallowed so a plugin can never
    /// get stuck half-registered. Any caller racing an already in-flight
    /// `unregister` for the same name awaits that same operation.
    pub async fn unregister(&self, name: &str) -> PluginResult<()> {
        if self.creating_component.lock().contains(name) {
            return Err(PluginError::PluginOperationInProgressError {
                plugin_name: name.to_string(),
                operation: InProgressOperation::Unloading,
            });
        }
        let current = self.registry.state(name).await?;
        if matches!(current, PluginState::Loading) {
            return Err(PluginError::PluginStateError { plugin_name: name.to_string(), state: current });
        }

        let shared = self.share_op(&self.in_flight_unloads, name, |manager, name| async move {
            manager.unregister_inner(&name).await
        });
        shared.await
    }

    async fn unregister_inner(&self, name: &str) -> PluginResult<()> {
        let current = self.registry.state(name).await?;
        if !matches!(current, PluginState::Registered | PluginState::Unloaded) {
            if let Err(err) = self.unload(name).await {
                warn!(plugin = %name, %err, "unload during unregister failed, proceeding with removal anyway");
            }
        }
        if let Some(context) = self.registry.context_of(name).await {
            context.destroy();
        }
        self.registry.unregister(name).await
    }

    /// Runs `op` for `name`, sharing the resulting future with any other
    /// caller that races this same name through the same `table` while it's
    /// still in flight — they all observe the identical result. The entry
    /// is removed from `table` once `op` completes, inside `op` itself
    /// can't reach `self` directly since the boxed future must be `'static`.
    fn share_op<F, Fut>(&self, table: &SyncMutex<HashMap<String, SharedOp>>, name: &str, op: F) -> SharedOp
    where
        F: FnOnce(Arc<PluginManager>, String) -> Fut + Send + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        let mut guard = table.lock();
        if let Some(existing) = guard.get(name) {
            return existing.clone();
        }
        let name_owned = name.to_string();
        let weak = self.self_weak.clone();
        let fut: BoxFuture<'static, PluginResult<()>> = Box::pin(async move {
            let Some(manager) = weak.upgrade() else {
                return Err(PluginError::PluginNotFoundError { plugin_name: name_owned.clone() });
            };
            let result = op(Arc::clone(&manager), name_owned.clone()).await;
            manager.in_flight_loads.lock().remove(&name_owned);
            manager.in_flight_unloads.lock().remove(&name_owned);
            result
        });
        let shared = fut.shared();
        guard.insert(name.to_string(), shared.clone());
        shared
    }

    /// Stops accepting new operations and unregisters every plugin,
    /// swallowing individual failures so one stuck plugin never blocks
    /// the others from being torn down.
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        for name in self.registry.plugin_names().await {
            if let Err(err) = self.unregister(&name).await {
                warn!(plugin = %name, %err, "error disposing plugin, continuing");
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Unregisters every currently registered plugin in parallel, swallowing
    /// individual failures. Unlike [`PluginManager::dispose`] this does not
    /// mark the manager disposed — it can still accept new registrations
    /// afterwards.
    pub async fn unload_all(&self) {
        let names = self.registry.plugin_names().await;
        let teardowns = names.into_iter().map(|name| async move {
            if let Err(err) = self.unregister(&name).await {
                warn!(plugin = %name, %err, "error unloading plugin, continuing");
            }
        });
        futures::future::join_all(teardowns).await;
    }

    /// A derived, dashboard-friendly snapshot of one plugin, or `None` if
    /// it isn't registered.
    pub async fn get_plugin_info(&self, name: &str) -> Option<PluginInfo> {
        let state = self.registry.state(name).await.ok()?;
        let manifest = self.registry.manifest_of(name).await;
        let metadata = self.registry.metadata_of(name).await?;
        Some(PluginInfo { name: name.to_string(), state, manifest, metadata })
    }

    /// Names of every registered plugin whose `customMetadata` is a
    /// superset of `filter`. Passes through to [`PluginRegistry::names_by_metadata`].
    pub async fn get_plugins_by_metadata(&self, filter: serde_json::Value) -> Vec<String> {
        let filter = match filter {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        self.registry.names_by_metadata(&filter).await
    }

    /// Whether `name` is currently tearing down. Used by hosts that want to
    /// disable a "remove" action in a UI while the backing operation is
    /// still in flight.
    pub async fn is_unloading(&self, name: &str) -> bool {
        matches!(self.registry.state(name).await, Ok(PluginState::Unloading))
    }

    /// Whether `name` has finished loading and can be mounted right now.
    pub async fn is_ready(&self, name: &str) -> bool {
        matches!(self.registry.state(name).await, Ok(PluginState::Loaded) | Ok(PluginState::Active))
    }

    /// Applies a registry transition and, when `debugOptions.logStateTransitions`
    /// is set, traces it.
    async fn transition(&self, name: &str, to: PluginState) -> PluginResult<()> {
        self.registry.transition(name, to).await?;
        if self.config.debug_options.log_state_transitions {
            info!(plugin = %name, state = ?to, "state transition");
        }
        Ok(())
    }

    /// `descriptor.timeout_ms`, falling back to
    /// [`PluginSystemConfig::global_timeout_ms`] — the budget racing the
    /// descriptor's `load()` call itself, distinct from the per-hook
    /// `lifecycle_hook_timeout_ms` used for `on_load`/`on_activate`/
    /// `on_deactivate`/`on_destroy`.
    fn resolve_load_timeout_ms(&self, descriptor: &PluginDescriptor) -> u64 {
        descriptor.timeout_ms.unwrap_or(self.config.global_timeout_ms)
    }

    /// Races `fut` against `timeout_ms`; `0` disables the timeout entirely
    /// and `fut` runs to completion unobserved, matching `lifecycleHookTimeout`'s
    /// documented "0 or infinity disables it" behavior.
    async fn run_hook_with_timeout<F, T>(
        &self,
        name: &str,
        hook: &'static str,
        timeout_ms: u64,
        fut: F,
    ) -> PluginResult<T>
    where
        F: Future<Output = PluginResult<T>>,
    {
        let log_hooks = self.config.debug_options.log_lifecycle_hooks;
        let start = Instant::now();
        if log_hooks {
            debug!(plugin = %name, hook, "lifecycle hook starting");
        }

        let outcome = if timeout_ms == 0 {
            fut.await
        } else {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                Err(_) => {
                    error!(plugin = %name, hook, timeout_ms, "lifecycle hook timed out");
                    Err(PluginError::PluginLifecycleTimeoutError { plugin_name: name.to_string(), hook, timeout_ms })
                }
            }
        };

        if log_hooks {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            debug!(plugin = %name, hook, elapsed_ms, ok = outcome.is_ok(), "lifecycle hook finished");
        }
        outcome
    }

    /// Runs a set of `before`/`after` global hooks, logging and — only in
    /// `enableDevMode` — re-raising a panicking hook instead of swallowing
    /// it. Production code never lets host-supplied global hooks brick
    /// plugin loading.
    fn run_global_hook_set(&self, hooks: &[GlobalHook], name: &str) {
        for hook in hooks {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| hook(name)));
            if result.is_err() {
                error!(plugin = %name, "global hook panicked");
                if self.config.enable_dev_mode {
                    std::panic::resume_unwind(result.unwrap_err());
                }
            }
        }
    }

    fn run_error_hooks(&self, name: &str, err: &PluginError) {
        for hook in self.hooks.read().on_error.iter() {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| hook(name, err)));
            if result.is_err() {
                error!(plugin = %name, "global error hook panicked");
                if self.config.enable_dev_mode {
                    std::panic::resume_unwind(result.unwrap_err());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluginhost_core::manifest::LoadedModule;

    struct NoopComponent;
    #[async_trait::async_trait]
    impl EntryComponent for NoopComponent {}

    fn working_descriptor(name: &str) -> PluginDescriptor {
        let load: pluginhost_core::manifest::LoadFn = Arc::new(|| {
            async {
                Ok::<LoadedModule, PluginError>(LoadedModule::new(PluginManifest {
                    name: "p".into(),
                    version: "0.1.0".into(),
                    entry_component: Arc::new(|| Arc::new(NoopComponent) as Arc<dyn EntryComponent>),
                    entry_module: None,
                    display_name: None,
                    description: None,
                    author: None,
                    dependencies: Vec::new(),
                }))
            }
            .boxed()
        });
        PluginDescriptor::new(name, load)
    }

    #[tokio::test]
    async fn load_many_respects_concurrency_and_loads_everything() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        for name in ["a", "b", "c"] {
            manager.register(working_descriptor(name)).await.unwrap();
        }
        let results = manager.load_many(vec!["a".into(), "b".into(), "c".into()]).await;
        assert_eq!(results.len(), 3);
        for (_, result) in &results {
            assert!(result.is_ok());
        }
        for name in ["a", "b", "c"] {
            assert_eq!(manager.registry.state(name).await.unwrap(), PluginState::Loaded);
        }
    }

    #[tokio::test]
    async fn load_and_activate_mounts_a_component() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        manager.register(working_descriptor("a")).await.unwrap();
        let component = manager.load_and_activate("a").await.unwrap();
        assert_eq!(manager.registry.state("a").await.unwrap(), PluginState::Active);
        assert!(manager.registry.metadata_of("a").await.unwrap().has_component);

        manager.deactivate_component("a", &component).await.unwrap();
        assert_eq!(manager.registry.state("a").await.unwrap(), PluginState::Loaded);
        assert!(!manager.registry.metadata_of("a").await.unwrap().has_component);
    }

    #[tokio::test]
    async fn auto_load_loads_in_the_background() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        manager.register(working_descriptor("a").with_auto_load(true)).await.unwrap();

        for _ in 0..50 {
            if manager.registry.state("a").await.unwrap() == PluginState::Loaded {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("auto_load did not load the plugin in time");
    }

    #[tokio::test]
    async fn unload_all_tears_down_every_plugin() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        for name in ["a", "b"] {
            manager.register(working_descriptor(name)).await.unwrap();
            manager.load(name).await.unwrap();
        }
        manager.unload_all().await;
        assert_eq!(manager.plugin_count().await, 0);
    }

    #[tokio::test]
    async fn get_plugin_info_reflects_registry_state() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        manager.register(working_descriptor("a")).await.unwrap();
        manager.load("a").await.unwrap();
        let info = manager.get_plugin_info("a").await.unwrap();
        assert_eq!(info.state, PluginState::Loaded);
        assert!(info.manifest.is_some());
        assert!(manager.get_plugin_info("missing").await.is_none());
    }

    #[tokio::test]
    async fn get_plugins_by_metadata_filters_on_custom_metadata() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        let mut metadata = serde_json::Map::new();
        metadata.insert("team".into(), serde_json::json!("growth"));
        manager.register(working_descriptor("a").with_initial_metadata(metadata)).await.unwrap();
        manager.register(working_descriptor("b")).await.unwrap();

        let matches = manager.get_plugins_by_metadata(serde_json::json!({"team": "growth"})).await;
        assert_eq!(matches, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn is_unloading_and_is_ready_reflect_state() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        manager.register(working_descriptor("a")).await.unwrap();
        assert!(!manager.is_ready("a").await);
        manager.load("a").await.unwrap();
        assert!(manager.is_ready("a").await);
        assert!(!manager.is_unloading("a").await);
    }

    #[tokio::test]
    async fn concurrent_loads_share_the_same_in_flight_operation() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        manager.register(working_descriptor("a")).await.unwrap();
        let (r1, r2) = tokio::join!(manager.load("a"), manager.load("a"));
        assert!(r1.is_ok());
        assert!(r2.is_ok());
        assert_eq!(manager.stats().total_loads, 1);
    }

    #[tokio::test]
    async fn zero_lifecycle_timeout_disables_the_timer() {
        let mut config = PluginSystemConfig::default();
        config.lifecycle_hook_timeout_ms = 0;
        let manager = PluginManager::new(config);
        manager.register(working_descriptor("a")).await.unwrap();
        manager.load("a").await.unwrap();
        assert_eq!(manager.registry.state("a").await.unwrap(), PluginState::Loaded);
    }

    #[tokio::test]
    async fn create_component_in_progress_reports_creating() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        manager.register(working_descriptor("a")).await.unwrap();
        manager.creating_component.lock().insert("a".to_string());
        let err = manager.create_component("a").await.unwrap_err();
        match err {
            PluginError::PluginOperationInProgressError { operation, .. } => {
                assert_eq!(operation, InProgressOperation::Creating);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregister_blocked_by_creation_reports_unloading() {
        let manager = PluginManager::new(PluginSystemConfig::default());
        manager.register(working_descriptor("a")).await.unwrap();
        manager.creating_component.lock().insert("a".to_string());
        let err = manager.unregister("a").await.unwrap_err();
        match err {
            PluginError::PluginOperationInProgressError { operation, .. } => {
                assert_eq!(operation, InProgressOperation::Unloading);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
