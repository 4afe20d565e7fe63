//! Error taxonomy for the plugin runtime.

use std::sync::Arc;

/// A single conceptual error root, one variant per failure kind a plugin
/// operation can surface. Every variant carries the plugin name it concerns
/// and, where useful, a human suggestion and a docs reference; the
/// underlying cause (when any) is attached via `#[source]` rather than a
/// string so callers keep a real `std::error::Error` chain. `cause` is an
/// `Arc` rather than a `Box` so `PluginError` itself stays `Clone` — needed
/// to hand the same error back to every caller awaiting a shared in-flight
/// `load`/`unregister`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// A plugin's `load` step (descriptor evaluation or `on_load` hook)
    /// failed.
    #[error("plugin '{plugin_name}' failed to load: {message}")]
    PluginLoadError {
        plugin_name: String,
        message: String,
        #[source]
        cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// An operation referenced a plugin name that isn't registered.
    #[error("plugin '{plugin_name}' is not registered")]
    PluginNotFoundError { plugin_name: String },

    /// `register` was called with a name that is already present.
    #[error("plugin '{plugin_name}' is already registered")]
    PluginAlreadyRegisteredError { plugin_name: String },

    /// An operation was attempted while the plugin was in a state that
    /// does not permit it (e.g. `load` on an `UNLOADING` plugin).
    #[error("plugin '{plugin_name}' is in state {state:?}, which does not permit this operation")]
    PluginStateError {
        plugin_name: String,
        state: crate::state::PluginState,
    },

    /// A plugin lifecycle hook (`on_load`/`on_activate`/`on_deactivate`/
    /// `on_destroy`) returned an error.
    #[error("plugin '{plugin_name}' lifecycle hook '{hook}' failed: {message}")]
    PluginLifecycleError {
        plugin_name: String,
        hook: &'static str,
        message: String,
        #[source]
        cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// A lifecycle hook exceeded `lifecycleHookTimeout`.
    #[error("plugin '{plugin_name}' lifecycle hook '{hook}' timed out after {timeout_ms}ms")]
    PluginLifecycleTimeoutError {
        plugin_name: String,
        hook: &'static str,
        timeout_ms: u64,
    },

    /// A load/unload was requested while an equivalent operation for the
    /// same plugin name was already in flight.
    #[error("a '{operation}' operation is already in progress for plugin '{plugin_name}'")]
    PluginOperationInProgressError {
        plugin_name: String,
        operation: InProgressOperation,
    },

    /// The remote loader failed to fetch, open, or resolve a remote bundle.
    #[error("remote load of plugin '{plugin_name}' from {url} failed: {message}")]
    RemoteLoadError {
        plugin_name: String,
        url: String,
        message: String,
        #[source]
        cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
}

/// Which in-flight operation a [`PluginError::PluginOperationInProgressError`]
/// was raised against: `createPluginComponent` colliding with itself
/// (`Creating`), or `unregister` colliding with an in-progress component
/// creation (`Unloading`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InProgressOperation {
    Creating,
    Unloading,
}

impl std::fmt::Display for InProgressOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Creating => "creating",
            Self::Unloading => "unloading",
        })
    }
}

impl PluginError {
    /// Stable tag naming the error kind, mirroring each variant's
    /// conceptual `name` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PluginLoadError { .. } => "PluginLoadError",
            Self::PluginNotFoundError { .. } => "PluginNotFoundError",
            Self::PluginAlreadyRegisteredError { .. } => "PluginAlreadyRegisteredError",
            Self::PluginStateError { .. } => "PluginStateError",
            Self::PluginLifecycleError { .. } => "PluginLifecycleError",
            Self::PluginLifecycleTimeoutError { .. } => "PluginLifecycleTimeoutError",
            Self::PluginOperationInProgressError { .. } => "PluginOperationInProgressError",
            Self::RemoteLoadError { .. } => "RemoteLoadError",
        }
    }

    pub fn plugin_name(&self) -> &str {
        match self {
            Self::PluginLoadError { plugin_name, .. }
            | Self::PluginNotFoundError { plugin_name }
            | Self::PluginAlreadyRegisteredError { plugin_name }
            | Self::PluginStateError { plugin_name, .. }
            | Self::PluginLifecycleError { plugin_name, .. }
            | Self::PluginLifecycleTimeoutError { plugin_name, .. }
            | Self::PluginOperationInProgressError { plugin_name, .. }
            | Self::RemoteLoadError { plugin_name, .. } => plugin_name,
        }
    }

    /// A short human-facing hint for what the caller might do next, where
    /// one applies.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::PluginNotFoundError { .. } => Some("register the plugin before using it"),
            Self::PluginAlreadyRegisteredError { .. } => {
                Some("unregister the existing plugin first, or pick a different name")
            }
            Self::PluginStateError { .. } => {
                Some("wait for the in-flight transition to finish before retrying")
            }
            Self::PluginLifecycleTimeoutError { .. } => {
                Some("raise lifecycleHookTimeout or investigate why the hook is slow")
            }
            Self::PluginOperationInProgressError { .. } => {
                Some("await the existing operation instead of starting a new one")
            }
            _ => None,
        }
    }

    pub fn docs_ref(&self) -> &'static str {
        match self {
            Self::PluginLoadError { .. } => "errors#plugin-load-error",
            Self::PluginNotFoundError { .. } => "errors#plugin-not-found",
            Self::PluginAlreadyRegisteredError { .. } => "errors#plugin-already-registered",
            Self::PluginStateError { .. } => "errors#plugin-state-error",
            Self::PluginLifecycleError { .. } => "errors#plugin-lifecycle-error",
            Self::PluginLifecycleTimeoutError { .. } => "errors#plugin-lifecycle-timeout",
            Self::PluginOperationInProgressError { .. } => "errors#plugin-operation-in-progress",
            Self::RemoteLoadError { .. } => "errors#remote-load-error",
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;
