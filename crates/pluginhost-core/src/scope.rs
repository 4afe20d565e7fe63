//! The isolated dependency-injection scope a plugin runs inside.
//!
//! Each plugin gets a child scope parented to the host's scope. Resolving
//! the reserved [`CONTEXT_TOKEN`] returns that plugin's own
//! [`PluginContext`](crate::context::PluginContext); every other token is
//! delegated to the parent scope, unresolved.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::PluginContext;

/// Opaque key identifying a resolvable service. Two tokens are equal iff
/// their names match; the name is expected to be a stable, namespaced
/// identifier (e.g. `"storage.kv"`), not a type name, since scopes are
/// resolved dynamically rather than through Rust's type system alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceToken(pub String);

impl ServiceToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl From<&str> for ServiceToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The reserved token every [`IsolatedScope`] resolves locally, never
/// delegating to its parent.
pub const CONTEXT_TOKEN: &str = "__pluginhost_context__";

/// A resolution scope: something capable of looking up a service by token.
/// The host's root scope and each plugin's [`IsolatedScope`] both implement
/// this trait, so a plugin's scope can delegate non-local lookups to
/// whatever scope it was created under without caring whether that parent
/// is itself isolated.
pub trait Scope: Send + Sync {
    fn resolve(&self, token: &ServiceToken) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// A per-plugin scope: resolves [`CONTEXT_TOKEN`] to the plugin's own
/// context, and otherwise forwards to `parent`. Destruction is idempotent
/// and irreversible, mirroring the host-wide `PluginContext::destroy`
/// contract this scope wraps.
pub struct IsolatedScope {
    plugin_name: String,
    parent: Arc<dyn Scope>,
    context: Arc<PluginContext>,
    destroyed: AtomicBool,
}

impl IsolatedScope {
    pub fn new(plugin_name: impl Into<String>, parent: Arc<dyn Scope>, context: Arc<PluginContext>) -> Arc<Self> {
        Arc::new(Self {
            plugin_name: plugin_name.into(),
            parent,
            context,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn context(&self) -> Arc<PluginContext> {
        Arc::clone(&self.context)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Tears down the scope's own context. Safe to call more than once;
    /// only the first call has any effect.
    pub fn destroy(&self) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.context.destroy();
        }
    }
}

impl Scope for IsolatedScope {
    fn resolve(&self, token: &ServiceToken) -> Option<Arc<dyn Any + Send + Sync>> {
        if token.0 == CONTEXT_TOKEN {
            return Some(Arc::clone(&self.context) as Arc<dyn Any + Send + Sync>);
        }
        self.parent.resolve(token)
    }
}

/// Builds an [`IsolatedScope`] for a newly registered plugin.
pub struct ScopeFactory;

impl ScopeFactory {
    pub fn create(plugin_name: &str, parent: Arc<dyn Scope>, context: Arc<PluginContext>) -> Arc<IsolatedScope> {
        IsolatedScope::new(plugin_name.to_string(), parent, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PluginContext;

    struct RootScope;
    impl Scope for RootScope {
        fn resolve(&self, token: &ServiceToken) -> Option<Arc<dyn Any + Send + Sync>> {
            if token.0 == "host.logger" {
                Some(Arc::new(42_u32) as Arc<dyn Any + Send + Sync>)
            } else {
                None
            }
        }
    }

    #[test]
    fn context_token_resolves_locally() {
        let ctx = PluginContext::new("demo", Arc::new(Vec::<String>::new()));
        let scope = ScopeFactory::create("demo", Arc::new(RootScope), ctx);
        let resolved = scope.resolve(&ServiceToken::from(CONTEXT_TOKEN));
        assert!(resolved.is_some());
    }

    #[test]
    fn unknown_token_delegates_to_parent() {
        let ctx = PluginContext::new("demo", Arc::new(Vec::<String>::new()));
        let scope = ScopeFactory::create("demo", Arc::new(RootScope), ctx);
        let resolved = scope.resolve(&ServiceToken::from("host.logger"));
        assert!(resolved.is_some());
        assert!(scope.resolve(&ServiceToken::from("nonexistent")).is_none());
    }

    #[test]
    fn destroy_is_idempotent() {
        let ctx = PluginContext::new("demo", Arc::new(Vec::<String>::new()));
        let scope = ScopeFactory::create("demo", Arc::new(RootScope), ctx);
        scope.destroy();
        scope.destroy();
        assert!(scope.is_destroyed());
    }
}
