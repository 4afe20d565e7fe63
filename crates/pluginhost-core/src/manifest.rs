//! The data a plugin registers with the host: how to load it, and what it
//! contributes once loaded.

use std::any::Any;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::component::EntryComponentFactory;
use crate::error::PluginError;

/// What a successful load produces: the manifest the plugin exposes, plus
/// an opaque handle kept alive for as long as the module is loaded (for a
/// locally-linked plugin this is typically `None`; for a remotely loaded
/// one it is the `libloading::Library` handle, dropped on unload).
pub struct LoadedModule {
    pub manifest: PluginManifest,
    keep_alive: Option<Arc<dyn Any + Send + Sync>>,
}

impl LoadedModule {
    pub fn new(manifest: PluginManifest) -> Self {
        Self { manifest, keep_alive: None }
    }

    pub fn with_keep_alive(manifest: PluginManifest, keep_alive: Arc<dyn Any + Send + Sync>) -> Self {
        Self { manifest, keep_alive: Some(keep_alive) }
    }
}

/// What a plugin exports once its module has loaded: its entry component
/// factory plus descriptive metadata. `entry_module` names a sub-path
/// within the bundle the host may additionally resolve (kept as an opaque
/// string; this crate does not interpret it).
#[derive(Clone)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub entry_component: EntryComponentFactory,
    pub entry_module: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub dependencies: Vec<String>,
}

/// Produces a [`LoadedModule`] for a plugin. Boxed so both an in-process
/// closure (the common, locally-linked case) and the remote loader's
/// download-then-open path share one shape.
pub type LoadFn = Arc<dyn Fn() -> BoxFuture<'static, Result<LoadedModule, PluginError>> + Send + Sync>;

/// What the host registers for a plugin before anything has been loaded.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub load: LoadFn,
    /// Opaque, plugin-specific configuration passed through to the loaded
    /// module; plugins deserialize whatever shape they expect from this.
    pub config: serde_json::Value,
    /// Service token names this plugin's context is permitted to resolve.
    pub service_whitelist: Vec<String>,
    /// Accepted for forward compatibility with hosts that want to retry a
    /// failed load automatically; the manager does not currently implement
    /// retry and treats these as inert.
    pub retry_on_error: bool,
    pub max_retries: u32,
    /// If set, the manager kicks off `load` right after a successful
    /// `register` and discards the resulting future; errors still surface
    /// through the state stream like any other failed load.
    pub auto_load: bool,
    /// Overrides the manager's global `global_timeout_ms` for this plugin's
    /// `load()` call only; `None` defers to the manager's configuration.
    /// Lifecycle hooks (`on_load`/`on_activate`/`on_deactivate`/`on_destroy`)
    /// always use `lifecycle_hook_timeout_ms` and are not affected by this
    /// field.
    pub timeout_ms: Option<u64>,
    /// Seeds the registry entry's `custom_metadata` at registration time.
    pub initial_metadata: serde_json::Map<String, serde_json::Value>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, load: LoadFn) -> Self {
        Self {
            name: name.into(),
            load,
            config: serde_json::Value::Null,
            service_whitelist: Vec::new(),
            retry_on_error: false,
            max_retries: 0,
            auto_load: false,
            timeout_ms: None,
            initial_metadata: serde_json::Map::new(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_service_whitelist(mut self, whitelist: Vec<String>) -> Self {
        self.service_whitelist = whitelist;
        self
    }

    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_initial_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.initial_metadata = metadata;
        self
    }
}
