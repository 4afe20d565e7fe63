//! Orchestration layer for the pluginhost dynamic plugin runtime: the
//! manager that drives the lifecycle, the remote loader, the outlet
//! adapter, configuration, and logging.

pub mod config;
pub mod logging;
pub mod manager;
pub mod outlet;

#[cfg(feature = "remote")]
pub mod remote;

pub mod prelude {
    pub use crate::config::{ConfigError, ConfigLoader, DebugOptions, PluginSystemConfig};
    pub use crate::manager::{ManagerStats, PluginInfo, PluginManager};
    pub use crate::outlet::{ComponentHandle, Outlet, ViewContainer};

    #[cfg(feature = "remote")]
    pub use crate::remote::{RemoteLoader, RemotePluginSpec};
}
