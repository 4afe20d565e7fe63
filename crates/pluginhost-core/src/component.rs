//! The abstract boundary between a loaded plugin and whatever rendering
//! surface the host provides. The host framework's own component and
//! dependency-injection primitives are out of scope here; this trait is the
//! seam a host implementation hangs off of.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::PluginContext;
use crate::error::PluginError;

/// A mountable unit a plugin contributes to the host UI. The manager calls
/// `on_load`/`on_activate`/`on_deactivate`/`on_destroy` at the matching
/// points in the plugin lifecycle; a host-specific container (outside this
/// crate) is responsible for actually placing the component's rendered
/// output somewhere.
#[async_trait]
pub trait EntryComponent: Send + Sync {
    /// Called once, right after the plugin module finishes loading, before
    /// any container exists for it.
    async fn on_load(&self, ctx: &Arc<PluginContext>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Called when the component is mounted into a container and becomes
    /// visible/active.
    async fn on_activate(&self, ctx: &Arc<PluginContext>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Called when the component is unmounted but the plugin itself is not
    /// being unloaded.
    async fn on_deactivate(&self, ctx: &Arc<PluginContext>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Called once, as the final step before the plugin is unloaded.
    async fn on_destroy(&self, ctx: &Arc<PluginContext>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }
}

/// Produces a fresh [`EntryComponent`] instance. Invoked twice over a
/// plugin's life by design: once by the manager during `load` (to run
/// `on_load` before any container exists) and again by the outlet each time
/// it mounts the plugin into a container. Both instantiation strategies are
/// acceptable as long as the lifecycle hook ordering holds; this crate
/// preserves the two-instantiation shape because it requires the least
/// additional machinery.
pub type EntryComponentFactory = Arc<dyn Fn() -> Arc<dyn EntryComponent> + Send + Sync>;
