//! The outlet adapter: the seam between a mounted plugin component and
//! whatever rendering surface the host provides. The host implements
//! [`ViewContainer`]; this crate only orchestrates calling into it at the
//! right points in the plugin lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;
use pluginhost_core::component::EntryComponent;
use pluginhost_core::error::PluginResult;
use tracing::warn;

use crate::manager::PluginManager;

/// A host-provided surface a plugin's rendered output can be placed into.
/// Mounting and unmounting are synchronous from this crate's point of
/// view — any async work the host needs (e.g. waiting on a frame) happens
/// inside its own implementation before returning.
pub trait ViewContainer: Send + Sync {
    fn mount(&self, component: Arc<dyn EntryComponent>) -> ComponentHandle;
}

/// A handle to a mounted component. Dropping it without calling
/// [`ComponentHandle::unmount`] leaks whatever the container allocated;
/// `Outlet` always calls it explicitly.
pub struct ComponentHandle {
    unmount: Box<dyn FnOnce() + Send>,
}

impl ComponentHandle {
    pub fn new(unmount: impl FnOnce() + Send + 'static) -> Self {
        Self { unmount: Box::new(unmount) }
    }

    pub fn unmount(self) {
        (self.unmount)();
    }
}

struct Mounted {
    component: Arc<dyn EntryComponent>,
    handle: ComponentHandle,
}

/// Mounts one plugin's component into a [`ViewContainer`], driving
/// `on_activate`/`on_deactivate` through the [`PluginManager`] as it goes.
/// Ensures the plugin is loaded on first mount.
pub struct Outlet {
    plugin_name: String,
    manager: Arc<PluginManager>,
    container: Arc<dyn ViewContainer>,
    mounted: Mutex<Option<Mounted>>,
}

impl Outlet {
    pub fn new(plugin_name: impl Into<String>, manager: Arc<PluginManager>, container: Arc<dyn ViewContainer>) -> Self {
        Self { plugin_name: plugin_name.into(), manager, container, mounted: Mutex::new(None) }
    }

    /// Mounts the plugin's component, loading the plugin first if needed.
    /// A no-op if already mounted.
    pub async fn mount(&self) -> PluginResult<()> {
        if self.mounted.lock().is_some() {
            return Ok(());
        }
        let component = self.manager.create_component(&self.plugin_name).await?;
        let handle = self.container.mount(Arc::clone(&component));
        *self.mounted.lock() = Some(Mounted { component, handle });
        Ok(())
    }

    /// Unmounts the plugin's component, if mounted. Errors from
    /// `on_deactivate` are logged and swallowed: the component is removed
    /// from the container regardless, matching the rest of this crate's
    /// "teardown always completes" stance.
    pub async fn unmount(&self) {
        let mounted = self.mounted.lock().take();
        let Some(mounted) = mounted else { return };
        if let Err(err) = self.manager.deactivate_component(&self.plugin_name, &mounted.component).await {
            warn!(plugin = %self.plugin_name, %err, "on_deactivate failed during unmount, unmounting anyway");
        }
        mounted.handle.unmount();
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.lock().is_some()
    }
}

impl Drop for Outlet {
    fn drop(&mut self) {
        if let Some(mounted) = self.mounted.lock().take() {
            mounted.handle.unmount();
        }
    }
}
