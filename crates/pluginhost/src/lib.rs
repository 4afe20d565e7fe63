//! A dynamic plugin runtime for component-oriented host applications:
//! register a plugin, load it on demand, mount its component into an
//! outlet, and unload it again — each plugin running inside its own
//! isolated scope with a whitelisted view onto the host's services.
//!
//! ```rust,ignore
//! use pluginhost::prelude::*;
//!
//! let system = PluginSystem::init(PluginSystemConfig::default());
//! system.manager().register(descriptor).await?;
//! system.manager().load("acme.widgets").await?;
//! system.dispose().await;
//! ```

use std::sync::Arc;

use pluginhost_runtime::config::PluginSystemConfig;
use pluginhost_runtime::manager::PluginManager;

pub mod prelude {
    pub use pluginhost_core::prelude::*;
    pub use pluginhost_runtime::prelude::*;

    pub use crate::PluginSystem;
}

/// The process-wide entry point: owns one [`PluginManager`] and its
/// configuration. Constructed explicitly via [`PluginSystem::init`] rather
/// than hidden behind a lazily-initialized global, so tests can spin up an
/// independent instance per case instead of sharing process-wide state.
pub struct PluginSystem {
    manager: Arc<PluginManager>,
}

impl PluginSystem {
    /// Builds a fresh plugin system with the given configuration. Does not
    /// touch any global state; callers own the returned `Arc` and decide
    /// its lifetime.
    pub fn init(config: PluginSystemConfig) -> Arc<Self> {
        Arc::new(Self { manager: PluginManager::new(config) })
    }

    pub fn manager(&self) -> Arc<PluginManager> {
        Arc::clone(&self.manager)
    }

    /// Unregisters every plugin and stops accepting new operations.
    /// Mirrors `PluginManager::dispose`; provided here so callers that only
    /// hold a `PluginSystem` don't need to reach into the manager for
    /// shutdown.
    pub async fn dispose(&self) {
        self.manager.dispose().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use pluginhost_core::component::EntryComponent;
    use pluginhost_core::manifest::{LoadedModule, PluginDescriptor, PluginManifest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingComponent {
        loads: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl EntryComponent for RecordingComponent {
        async fn on_load(&self, _ctx: &Arc<pluginhost_core::context::PluginContext>) -> pluginhost_core::error::PluginResult<()> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn demo_descriptor(loads: Arc<AtomicUsize>) -> PluginDescriptor {
        let load: pluginhost_core::manifest::LoadFn = Arc::new(move || {
            let loads = Arc::clone(&loads);
            async move {
                let manifest = PluginManifest {
                    name: "demo".into(),
                    version: "0.1.0".into(),
                    entry_component: Arc::new(move || Arc::new(RecordingComponent { loads: Arc::clone(&loads) }) as Arc<dyn EntryComponent>),
                    entry_module: None,
                    display_name: None,
                    description: None,
                    author: None,
                    dependencies: Vec::new(),
                };
                Ok::<_, pluginhost_core::error::PluginError>(LoadedModule::new(manifest))
            }
            .boxed()
        });
        PluginDescriptor::new("demo", load)
    }

    #[tokio::test]
    async fn end_to_end_register_load_unload() {
        let system = PluginSystem::init(PluginSystemConfig::default());
        let loads = Arc::new(AtomicUsize::new(0));
        system.manager().register(demo_descriptor(Arc::clone(&loads))).await.unwrap();
        system.manager().load("demo").await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        system.manager().unload("demo").await.unwrap();
        system.dispose().await;
    }

    #[tokio::test]
    async fn double_load_is_idempotent() {
        let system = PluginSystem::init(PluginSystemConfig::default());
        let loads = Arc::new(AtomicUsize::new(0));
        system.manager().register(demo_descriptor(Arc::clone(&loads))).await.unwrap();
        system.manager().load("demo").await.unwrap();
        system.manager().load("demo").await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
