//! The controlled surface a plugin uses to talk back to its host: a
//! whitelisted service lookup and a small pub/sub event bus.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::warn;

use crate::scope::{Scope, ServiceToken};

/// An event handler registered via [`PluginContext::subscribe`]. Payloads
/// are untyped JSON, matching the wire-agnostic event bus `spec.md`
/// describes; plugins that want a typed payload deserialize it themselves.
pub type EventHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Returned by [`PluginContext::subscribe`]; dropping it does nothing on
/// its own — call [`Unsubscribe::unsubscribe`] to remove the handler.
/// After the context is destroyed, `subscribe` returns a no-op instance.
pub struct Unsubscribe {
    inner: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    fn noop() -> Self {
        Self { inner: None }
    }

    fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self { inner: Some(Box::new(f)) }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.inner.take() {
            f();
        }
    }
}

/// A plugin's controlled communication surface with its host. Every method
/// here is infallible by design: a bad lookup or a subscribe-after-destroy
/// never panics or propagates an error to plugin code, it just does
/// nothing or returns `None`.
pub struct PluginContext {
    plugin_name: String,
    whitelist: Arc<Vec<String>>,
    host_scope: Option<Arc<dyn Scope>>,
    handlers: RwLock<HashMap<String, Vec<(u64, EventHandler)>>>,
    next_handler_id: AtomicU64,
    destroyed: AtomicBool,
    /// Lets `subscribe` hand an unsubscribe closure an owned handle back to
    /// this context without requiring every caller to hold one.
    self_weak: Weak<PluginContext>,
}

impl PluginContext {
    /// `whitelist` lists the service token names this plugin is permitted
    /// to resolve; `host_scope` is the scope `get_service` delegates to
    /// once a token clears the whitelist. Pass `None` for a context with no
    /// service access (whitelist-only contexts used in tests).
    pub fn new(plugin_name: impl Into<String>, whitelist: Arc<Vec<String>>) -> Arc<Self> {
        Self::with_scope(plugin_name, whitelist, None)
    }

    pub fn with_scope(
        plugin_name: impl Into<String>,
        whitelist: Arc<Vec<String>>,
        host_scope: Option<Arc<dyn Scope>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            plugin_name: plugin_name.into(),
            whitelist,
            host_scope,
            handlers: RwLock::new(HashMap::new()),
            next_handler_id: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            self_weak: weak.clone(),
        })
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Resolves a service by name. Returns `None` when destroyed or when the
    /// host scope has nothing registered under it — never an error. An
    /// empty or absent whitelist imposes no restriction (whatever the
    /// parent scope yields); a non-empty whitelist rejects names it doesn't
    /// list.
    pub fn get_service(&self, name: &str) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        if self.is_destroyed() {
            return None;
        }
        if !self.whitelist.is_empty() && !self.whitelist.iter().any(|w| w == name) {
            warn!(plugin = %self.plugin_name, service = %name, "service lookup rejected: not on whitelist");
            return None;
        }
        self.host_scope.as_ref()?.resolve(&ServiceToken::new(name))
    }

    /// Publishes `payload` under `event` to every handler currently
    /// subscribed to it. Each handler runs in isolation: a panicking
    /// handler is caught and logged, never aborting the remaining
    /// handlers or propagating out of `emit`. A no-op after destroy.
    pub fn emit(&self, event: &str, payload: &serde_json::Value) {
        if self.is_destroyed() {
            return;
        }
        let handlers = {
            let guard = self.handlers.read();
            guard.get(event).cloned().unwrap_or_default()
        };
        for (id, handler) in handlers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload)));
            if result.is_err() {
                warn!(plugin = %self.plugin_name, %event, handler_id = id, "event handler panicked");
            }
        }
    }

    /// Registers `handler` for `event`. Returns a no-op [`Unsubscribe`] if
    /// the context has already been destroyed.
    pub fn subscribe(&self, event: &str, handler: EventHandler) -> Unsubscribe {
        if self.is_destroyed() {
            return Unsubscribe::noop();
        }
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));

        let Some(this) = self.self_weak.upgrade() else {
            return Unsubscribe::noop();
        };
        let event = event.to_string();
        Unsubscribe::new(move || {
            let mut guard = this.handlers.write();
            if let Some(bucket) = guard.get_mut(&event) {
                bucket.retain(|(hid, _)| *hid != id);
                if bucket.is_empty() {
                    guard.remove(&event);
                }
            }
        })
    }

    /// Tears the context down: clears every handler and marks it
    /// destroyed. Idempotent.
    pub fn destroy(&self) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.handlers.write().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn get_service_rejects_non_whitelisted_names() {
        let ctx = PluginContext::new("demo", Arc::new(vec!["storage.kv".to_string()]));
        assert!(ctx.get_service("storage.kv").is_none()); // no host scope wired
        assert!(ctx.get_service("network.fetch").is_none());
    }

    #[test]
    fn emit_delivers_to_subscribers_and_survives_panics() {
        let ctx = PluginContext::new("demo", Arc::new(vec![]));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        ctx.subscribe(
            "tick",
            Arc::new(move |_| {
                panic!("boom");
            }),
        );
        let calls3 = Arc::clone(&calls2);
        ctx.subscribe(
            "tick",
            Arc::new(move |_| {
                calls3.fetch_add(1, Ordering::SeqCst);
            }),
        );
        ctx.emit("tick", &serde_json::json!({}));
        assert_eq!(calls2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let ctx = PluginContext::new("demo", Arc::new(vec![]));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let unsub = ctx.subscribe(
            "tick",
            Arc::new(move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        unsub.unsubscribe();
        ctx.emit("tick", &serde_json::json!({}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscribe_after_destroy_is_a_noop() {
        let ctx = PluginContext::new("demo", Arc::new(vec![]));
        ctx.destroy();
        let unsub = ctx.subscribe("tick", Arc::new(|_| {}));
        unsub.unsubscribe(); // must not panic
        assert!(ctx.is_destroyed());
    }

    #[test]
    fn destroy_is_idempotent() {
        let ctx = PluginContext::new("demo", Arc::new(vec![]));
        ctx.destroy();
        ctx.destroy();
        assert!(ctx.is_destroyed());
    }
}
