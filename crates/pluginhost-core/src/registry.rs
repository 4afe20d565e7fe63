//! The table of record for every plugin the host knows about, and the
//! broadcast stream of its state transitions.

use std::collections::HashMap;
use std::sync::Arc;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::component::EntryComponent;
use crate::context::PluginContext;
use crate::error::{PluginError, PluginResult};
use crate::manifest::{LoadedModule, PluginDescriptor};
use crate::scope::IsolatedScope;
use crate::state::{PluginErrorSummary, PluginState, PluginStateEvent};

const STATE_STREAM_CAPACITY: usize = 1024;

/// Bookkeeping alongside a plugin's current state: everything a dashboard or
/// health check would want without reaching into the live scope/context.
/// `error_count` only ever increases; `custom_metadata` is caller-owned data
/// shallow-merged in by [`PluginRegistry::update_metadata`].
#[derive(Debug, Clone, Default)]
pub struct PluginMetadataRecord {
    pub state_history_len: u64,
    pub error_count: u32,
    pub last_error: Option<PluginErrorSummary>,
    pub loaded_at: Option<String>,
    pub activated_at: Option<String>,
    pub has_component: bool,
    pub is_creating_component: bool,
    pub custom_metadata: serde_json::Map<String, serde_json::Value>,
}

/// Everything the registry knows about one registered plugin.
pub struct RegistryEntry {
    pub descriptor: PluginDescriptor,
    pub state: PluginState,
    pub metadata: PluginMetadataRecord,
    pub scope: Option<Arc<IsolatedScope>>,
    pub context: Option<Arc<PluginContext>>,
    pub module: Option<LoadedModule>,
    /// The component instance created for `on_load`/`on_destroy`, kept
    /// alive for the plugin's whole life — distinct from the instances an
    /// outlet creates per mount for `on_activate`/`on_deactivate`.
    pub lifecycle_component: Option<Arc<dyn EntryComponent>>,
}

impl RegistryEntry {
    fn new(descriptor: PluginDescriptor) -> Self {
        let mut metadata = PluginMetadataRecord::default();
        metadata.custom_metadata = descriptor.initial_metadata.clone();
        Self {
            descriptor,
            state: PluginState::Registered,
            metadata,
            scope: None,
            context: None,
            lifecycle_component: None,
            module: None,
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::from("unknown"))
}

/// Owns every plugin's entry and broadcasts every state transition. The
/// registry does not itself drive the lifecycle (that's the manager's job);
/// it only accepts transitions, validates them against the state machine,
/// and records the result.
pub struct PluginRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    events: broadcast::Sender<PluginStateEvent>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(STATE_STREAM_CAPACITY);
        Self { entries: RwLock::new(HashMap::new()), events }
    }

    /// Subscribes to the state stream. Only transitions published after
    /// this call are observed — there is no replay of past history.
    pub fn subscribe(&self) -> broadcast::Receiver<PluginStateEvent> {
        self.events.subscribe()
    }

    pub async fn register(&self, descriptor: PluginDescriptor) -> PluginResult<()> {
        let mut guard = self.entries.write().await;
        if guard.contains_key(&descriptor.name) {
            return Err(PluginError::PluginAlreadyRegisteredError { plugin_name: descriptor.name });
        }
        let name = descriptor.name.clone();
        guard.insert(name.clone(), RegistryEntry::new(descriptor));
        drop(guard);
        info!(plugin = %name, "plugin registered");
        self.publish(PluginStateEvent::new(name, PluginState::Registered));
        Ok(())
    }

    /// Removes a plugin's entry unconditionally. The manager is
    /// responsible for having already torn down its scope/context/module;
    /// this call always succeeds in removing the bookkeeping entry even if
    /// the caller skipped that teardown, so a plugin can never get stuck
    /// half-registered.
    pub async fn unregister(&self, name: &str) -> PluginResult<()> {
        let mut guard = self.entries.write().await;
        if guard.remove(name).is_none() {
            return Err(PluginError::PluginNotFoundError { plugin_name: name.to_string() });
        }
        drop(guard);
        debug!(plugin = %name, "plugin unregistered");
        Ok(())
    }

    pub async fn state(&self, name: &str) -> PluginResult<PluginState> {
        let guard = self.entries.read().await;
        guard
            .get(name)
            .map(|e| e.state)
            .ok_or_else(|| PluginError::PluginNotFoundError { plugin_name: name.to_string() })
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn plugin_names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn plugin_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn names_in_state(&self, state: PluginState) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.state == state)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Validates and applies `name`'s transition to `to`, publishing the
    /// resulting event. Rejects transitions the state machine disallows.
    pub async fn transition(&self, name: &str, to: PluginState) -> PluginResult<()> {
        let mut guard = self.entries.write().await;
        let entry = guard
            .get_mut(name)
            .ok_or_else(|| PluginError::PluginNotFoundError { plugin_name: name.to_string() })?;
        if !entry.state.can_transition_to(to) {
            return Err(PluginError::PluginStateError { plugin_name: name.to_string(), state: entry.state });
        }
        entry.state = to;
        entry.metadata.state_history_len += 1;
        match to {
            PluginState::Loaded => entry.metadata.loaded_at = Some(now_rfc3339()),
            PluginState::Active => entry.metadata.activated_at = Some(now_rfc3339()),
            _ => {}
        }
        drop(guard);
        self.publish(PluginStateEvent::new(name, to));
        Ok(())
    }

    /// Forces `name` into `Error`, recording the cause and incrementing its
    /// monotonic error counter, then publishes the event. Used by the
    /// manager when a hook fails; bypasses `can_transition_to` validation
    /// because `Error` is reachable unconditionally from every transient
    /// state and this path is only taken from one.
    pub async fn record_error(&self, name: &str, error: &PluginError) -> PluginResult<()> {
        let mut guard = self.entries.write().await;
        let entry = guard
            .get_mut(name)
            .ok_or_else(|| PluginError::PluginNotFoundError { plugin_name: name.to_string() })?;
        entry.state = PluginState::Error;
        entry.metadata.error_count += 1;
        entry.metadata.last_error = Some(error.into());
        drop(guard);
        self.publish(PluginStateEvent::with_error(name, error));
        Ok(())
    }

    pub async fn set_scope(&self, name: &str, scope: Arc<IsolatedScope>) -> PluginResult<()> {
        self.with_entry_mut(name, |e| e.scope = Some(scope)).await
    }

    pub async fn set_context(&self, name: &str, context: Arc<PluginContext>) -> PluginResult<()> {
        self.with_entry_mut(name, |e| e.context = Some(context)).await
    }

    pub async fn set_module(&self, name: &str, module: LoadedModule) -> PluginResult<()> {
        self.with_entry_mut(name, |e| e.module = Some(module)).await
    }

    pub async fn set_lifecycle_component(&self, name: &str, component: Arc<dyn EntryComponent>) -> PluginResult<()> {
        self.with_entry_mut(name, |e| e.lifecycle_component = Some(component)).await
    }

    pub async fn lifecycle_component_of(&self, name: &str) -> Option<Arc<dyn EntryComponent>> {
        self.entries.read().await.get(name).and_then(|e| e.lifecycle_component.clone())
    }

    pub async fn clear_module(&self, name: &str) -> PluginResult<()> {
        self.with_entry_mut(name, |e| {
            e.module = None;
            e.scope = None;
            e.context = None;
            e.lifecycle_component = None;
        })
        .await
    }

    pub async fn context_of(&self, name: &str) -> Option<Arc<PluginContext>> {
        self.entries.read().await.get(name).and_then(|e| e.context.clone())
    }

    pub async fn manifest_of(&self, name: &str) -> Option<crate::manifest::PluginManifest> {
        self.entries.read().await.get(name).and_then(|e| e.module.as_ref().map(|m| m.manifest.clone()))
    }

    pub async fn metadata_of(&self, name: &str) -> Option<PluginMetadataRecord> {
        self.entries.read().await.get(name).map(|e| e.metadata.clone())
    }

    pub async fn descriptor_of(&self, name: &str) -> Option<PluginDescriptor> {
        self.entries.read().await.get(name).map(|e| e.descriptor.clone())
    }

    pub async fn set_has_component(&self, name: &str, has_component: bool) -> PluginResult<()> {
        self.with_entry_mut(name, |e| e.metadata.has_component = has_component).await
    }

    pub async fn set_creating_component(&self, name: &str, creating: bool) -> PluginResult<()> {
        self.with_entry_mut(name, |e| e.metadata.is_creating_component = creating).await
    }

    /// Shallow-merges `patch`'s keys into `name`'s `custom_metadata`, then
    /// publishes a state event reflecting the entry's current (unchanged)
    /// state. `patch` is expected to be a JSON object; non-object values are
    /// ignored.
    pub async fn update_metadata(&self, name: &str, patch: serde_json::Value) -> PluginResult<()> {
        let current_state = {
            let mut guard = self.entries.write().await;
            let entry = guard
                .get_mut(name)
                .ok_or_else(|| PluginError::PluginNotFoundError { plugin_name: name.to_string() })?;
            if let serde_json::Value::Object(patch) = patch {
                entry.metadata.custom_metadata.extend(patch);
            }
            entry.state
        };
        self.publish(PluginStateEvent::new(name, current_state));
        Ok(())
    }

    /// Names of every entry whose `custom_metadata` contains all key/value
    /// pairs in `filter`.
    pub async fn names_by_metadata(&self, filter: &serde_json::Map<String, serde_json::Value>) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| filter.iter().all(|(k, v)| e.metadata.custom_metadata.get(k) == Some(v)))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Removes every entry unconditionally, without running any teardown —
    /// callers that need graceful teardown should unregister each plugin
    /// through the manager instead.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    async fn with_entry_mut(&self, name: &str, f: impl FnOnce(&mut RegistryEntry)) -> PluginResult<()> {
        let mut guard = self.entries.write().await;
        let entry = guard
            .get_mut(name)
            .ok_or_else(|| PluginError::PluginNotFoundError { plugin_name: name.to_string() })?;
        f(entry);
        Ok(())
    }

    fn publish(&self, event: PluginStateEvent) {
        // A send error just means there are currently no subscribers; the
        // transition itself still succeeded.
        let _ = self.events.send(event);
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn descriptor(name: &str) -> PluginDescriptor {
        let load: crate::manifest::LoadFn = Arc::new(|| {
            async {
                Err::<LoadedModule, _>(PluginError::PluginLoadError {
                    plugin_name: "x".into(),
                    message: "unused in test".into(),
                    cause: None,
                })
            }
            .boxed()
        });
        PluginDescriptor::new(name, load)
    }

    #[tokio::test]
    async fn register_rejects_duplicate_names() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a")).await.unwrap();
        let err = registry.register(descriptor("a")).await.unwrap_err();
        assert_eq!(err.name(), "PluginAlreadyRegisteredError");
    }

    #[tokio::test]
    async fn unregister_always_removes_entry() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a")).await.unwrap();
        registry.unregister("a").await.unwrap();
        assert!(!registry.contains("a").await);
    }

    #[tokio::test]
    async fn canonical_transitions_succeed_in_order() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a")).await.unwrap();
        registry.transition("a", PluginState::Loading).await.unwrap();
        registry.transition("a", PluginState::Loaded).await.unwrap();
        registry.transition("a", PluginState::Active).await.unwrap();
        registry.transition("a", PluginState::Unloading).await.unwrap();
        registry.transition("a", PluginState::Unloaded).await.unwrap();
        assert_eq!(registry.state("a").await.unwrap(), PluginState::Unloaded);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a")).await.unwrap();
        let err = registry.transition("a", PluginState::Active).await.unwrap_err();
        assert_eq!(err.name(), "PluginStateError");
    }

    #[tokio::test]
    async fn error_count_is_monotonic() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a")).await.unwrap();
        registry.transition("a", PluginState::Loading).await.unwrap();
        let err = PluginError::PluginLoadError { plugin_name: "a".into(), message: "boom".into(), cause: None };
        registry.record_error("a", &err).await.unwrap();
        registry.record_error("a", &err).await.unwrap();
        let metadata = registry.metadata_of("a").await.unwrap();
        assert_eq!(metadata.error_count, 2);
    }

    #[tokio::test]
    async fn update_metadata_shallow_merges_custom_fields() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a")).await.unwrap();
        registry.update_metadata("a", serde_json::json!({"team": "growth", "tier": 1})).await.unwrap();
        registry.update_metadata("a", serde_json::json!({"tier": 2})).await.unwrap();
        let metadata = registry.metadata_of("a").await.unwrap();
        assert_eq!(metadata.custom_metadata.get("team").unwrap(), "growth");
        assert_eq!(metadata.custom_metadata.get("tier").unwrap(), 2);
    }

    #[tokio::test]
    async fn names_by_metadata_matches_on_superset() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a")).await.unwrap();
        registry.register(descriptor("b")).await.unwrap();
        registry.update_metadata("a", serde_json::json!({"team": "growth"})).await.unwrap();
        registry.update_metadata("b", serde_json::json!({"team": "infra"})).await.unwrap();

        let mut filter = serde_json::Map::new();
        filter.insert("team".into(), serde_json::json!("growth"));
        assert_eq!(registry.names_by_metadata(&filter).await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn clear_removes_every_entry() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a")).await.unwrap();
        registry.register(descriptor("b")).await.unwrap();
        registry.clear().await;
        assert_eq!(registry.plugin_count().await, 0);
    }

    #[tokio::test]
    async fn subscribers_only_see_future_events() {
        let registry = PluginRegistry::new();
        registry.register(descriptor("a")).await.unwrap();
        let mut rx = registry.subscribe();
        registry.transition("a", PluginState::Loading).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.plugin_name, "a");
        assert_eq!(event.state, PluginState::Loading);
    }
}
