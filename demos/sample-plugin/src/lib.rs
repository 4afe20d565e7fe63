//! A worked example plugin: a counter that persists its value through the
//! host's key-value service and announces every change on the event bus.
//!
//! # Service ID
//!
//! Declares `"kv.store"` on its service whitelist; resolves it through
//! [`PluginContext::get_service`] and downcasts to [`KvStore`].
//!
//! # Registering
//!
//! ```rust,ignore
//! use sample_plugin::counter_descriptor;
//!
//! manager.register(counter_descriptor()).await?;
//! manager.load("sample.counter").await?;
//! ```
//!
//! # Events
//!
//! Emits `"counter.changed"` with `{"count": <u64>}` every time
//! [`CounterComponent::on_activate`] runs.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::FutureExt;
use pluginhost_core::component::{EntryComponent, EntryComponentFactory};
use pluginhost_core::context::PluginContext;
use pluginhost_core::error::PluginResult;
use pluginhost_core::manifest::{LoadedModule, PluginDescriptor, PluginManifest};

const PLUGIN_NAME: &str = "sample.counter";
const KV_SERVICE_ID: &str = "kv.store";

/// The key-value surface this plugin expects its host to provide under
/// [`KV_SERVICE_ID`]. A host resolves a concrete implementation through its
/// own scope; this crate only downcasts whatever `Arc<dyn Any>` comes back.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<u64>;
    fn set(&self, key: &str, value: u64);
}

/// Shared counter state. A single instance is created once in the
/// descriptor's `load` closure and captured by every component instance
/// the factory produces, so the value survives across the lifecycle
/// component (`on_load`/`on_destroy`) and however many mount-time
/// components an outlet creates (`on_activate`/`on_deactivate`).
struct CounterComponent {
    count: Arc<AtomicU64>,
}

#[async_trait]
impl EntryComponent for CounterComponent {
    async fn on_load(&self, ctx: &Arc<PluginContext>) -> PluginResult<()> {
        if let Some(kv) = ctx.get_service(KV_SERVICE_ID).and_then(downcast_kv) {
            self.count.store(kv.get("count").unwrap_or(0), Ordering::SeqCst);
        }
        Ok(())
    }

    async fn on_activate(&self, ctx: &Arc<PluginContext>) -> PluginResult<()> {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.emit("counter.changed", &serde_json::json!({ "count": count }));
        Ok(())
    }

    async fn on_destroy(&self, ctx: &Arc<PluginContext>) -> PluginResult<()> {
        if let Some(kv) = ctx.get_service(KV_SERVICE_ID).and_then(downcast_kv) {
            kv.set("count", self.count.load(Ordering::SeqCst));
        }
        Ok(())
    }
}

fn downcast_kv(service: Arc<dyn Any + Send + Sync>) -> Option<Arc<dyn KvStore>> {
    // `KvStore` isn't `Any` itself, so the host is expected to hand back an
    // `Arc<dyn KvStore>` wrapped as `Arc<dyn Any>`; this is the one place
    // that assumption is made concrete.
    let service: Arc<dyn Any + Send + Sync> = service;
    service.downcast::<CounterKvHandle>().ok().map(|h| Arc::clone(&h.0))
}

/// Wrapper a host uses to hand a `KvStore` implementation through
/// `get_service`'s `Arc<dyn Any>` return type; `downcast_kv` unwraps it.
pub struct CounterKvHandle(pub Arc<dyn KvStore>);

/// Builds the descriptor a host registers to install this plugin. The
/// returned descriptor's `load` closure runs once per `load`/retry-from-error
/// attempt and produces a fresh counter starting at zero; persistence across
/// unload/reload cycles is the host's `KvStore`'s job, not this plugin's.
pub fn counter_descriptor() -> PluginDescriptor {
    let load: pluginhost_core::manifest::LoadFn = Arc::new(|| {
        async {
            let count = Arc::new(AtomicU64::new(0));
            let entry_component: EntryComponentFactory = Arc::new(move || {
                Arc::new(CounterComponent { count: Arc::clone(&count) }) as Arc<dyn EntryComponent>
            });
            let manifest = PluginManifest {
                name: PLUGIN_NAME.to_string(),
                version: "0.1.0".to_string(),
                entry_component,
                entry_module: None,
                display_name: Some("Counter".to_string()),
                description: Some("Persists a counter through the host's kv.store service".to_string()),
                author: None,
                dependencies: Vec::new(),
            };
            Ok::<_, pluginhost_core::error::PluginError>(LoadedModule::new(manifest))
        }
        .boxed()
    });
    PluginDescriptor::new(PLUGIN_NAME, load).with_service_whitelist(vec![KV_SERVICE_ID.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MemoryKv(Mutex<std::collections::HashMap<String, u64>>);
    impl KvStore for MemoryKv {
        fn get(&self, key: &str) -> Option<u64> {
            self.0.lock().unwrap().get(key).copied()
        }
        fn set(&self, key: &str, value: u64) {
            self.0.lock().unwrap().insert(key.to_string(), value);
        }
    }

    #[tokio::test]
    async fn descriptor_produces_working_component() {
        let descriptor = counter_descriptor();
        let module = (descriptor.load)().await.unwrap();
        let component = (module.manifest.entry_component)();

        let ctx = PluginContext::new(PLUGIN_NAME, Arc::new(vec![KV_SERVICE_ID.to_string()]));
        component.on_load(&ctx).await.unwrap();
        component.on_activate(&ctx).await.unwrap();
        component.on_activate(&ctx).await.unwrap();
        // No host scope wired in this test, so kv lookups miss and the
        // counter still advances purely in-memory.
        assert_eq!(ctx.is_destroyed(), false);
    }

    #[test]
    fn kv_handle_roundtrips_through_any() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv(Mutex::new(std::collections::HashMap::new())));
        kv.set("count", 7);
        let handle: Arc<dyn Any + Send + Sync> = Arc::new(CounterKvHandle(Arc::clone(&kv)));
        let recovered = downcast_kv(handle).unwrap();
        assert_eq!(recovered.get("count"), Some(7));
    }
}
