//! The plugin lifecycle state machine and its broadcast event stream.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// A plugin's position in its lifecycle.
///
/// Transitions:
/// `Registered -> Loading -> Loaded -> Active -> Unloading -> Unloaded`,
/// with `Error` reachable from any of the transient states
/// (`Loading`/`Unloading`) and from `Loaded`/`Active` if a later hook fails.
/// `Active -> Loaded` is also allowed: destroying a plugin's mounted
/// component returns it to `Loaded` without unloading the plugin itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PluginState {
    Registered,
    Loading,
    Loaded,
    Active,
    Unloading,
    Unloaded,
    Error,
}

impl PluginState {
    /// Whether `to` is a transition `spec.md`'s state table allows from
    /// `self`. `Error` is reachable from any transient state unconditionally.
    pub fn can_transition_to(self, to: PluginState) -> bool {
        use PluginState::*;
        match (self, to) {
            (Registered, Loading) => true,
            (Error, Loading) => true,
            (Loading, Loaded) => true,
            (Loaded, Active) => true,
            (Active, Loaded) => true,
            (Active, Unloading) => true,
            (Loaded, Unloading) => true,
            (Unloading, Unloaded) => true,
            (_, Error) => matches!(self, Loading | Unloading | Loaded | Active),
            _ => false,
        }
    }
}

/// A short, serializable summary of an error attached to a `PluginStateEvent`.
/// Kept separate from `PluginError` itself so the event stream payload stays
/// `Clone + Serialize` without requiring the full error (which carries a
/// boxed `dyn Error` source) to be.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PluginErrorSummary {
    pub name: &'static str,
    pub message: String,
}

impl From<&crate::error::PluginError> for PluginErrorSummary {
    fn from(err: &crate::error::PluginError) -> Self {
        Self {
            name: err.name(),
            message: err.to_string(),
        }
    }
}

/// A single state transition, as published on the registry's broadcast
/// stream. New subscribers only observe events emitted after they
/// subscribe — there is no synthetic seed value replaying past history.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PluginStateEvent {
    pub plugin_name: String,
    pub state: PluginState,
    pub timestamp: String,
    pub error: Option<PluginErrorSummary>,
}

impl PluginStateEvent {
    pub fn new(plugin_name: impl Into<String>, state: PluginState) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            state,
            timestamp: now_rfc3339(),
            error: None,
        }
    }

    pub fn with_error(plugin_name: impl Into<String>, error: &crate::error::PluginError) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            state: PluginState::Error,
            timestamp: now_rfc3339(),
            error: Some(error.into()),
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_path_is_allowed() {
        use PluginState::*;
        assert!(Registered.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Loaded));
        assert!(Loaded.can_transition_to(Active));
        assert!(Active.can_transition_to(Unloading));
        assert!(Unloading.can_transition_to(Unloaded));
    }

    #[test]
    fn error_reachable_from_transient_states_only() {
        use PluginState::*;
        assert!(Loading.can_transition_to(Error));
        assert!(Unloading.can_transition_to(Error));
        assert!(Loaded.can_transition_to(Error));
        assert!(Active.can_transition_to(Error));
        assert!(!Registered.can_transition_to(Error));
        assert!(!Unloaded.can_transition_to(Error));
    }

    #[test]
    fn skips_are_rejected() {
        use PluginState::*;
        assert!(!Registered.can_transition_to(Active));
        assert!(!Loaded.can_transition_to(Unloaded));
    }

    #[test]
    fn active_can_return_to_loaded() {
        use PluginState::*;
        assert!(Active.can_transition_to(Loaded));
        assert!(!Unloading.can_transition_to(Loaded));
    }
}
