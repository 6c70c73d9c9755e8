//! lab-plugins: service-token plugin host
//!
//! Features:
//! - Descriptors declaring a provided token, required and optional tokens
//! - Registry with duplicate and self-dependency checks
//! - Deterministic activation planning with cycle detection
//! - Async activation with shared in-flight requests
//! - Auto-start, deferred restore and lifecycle signals

pub mod events;
pub mod host;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod state;

pub use events::{ActivationFailure, LifecycleSignals, PluginEvent, StartReport, StartSummary};
pub use host::PluginHost;
pub use plugin::{ActivationContext, AutoStart, Plugin, PluginDescriptor, PluginDescriptorBuilder, Service};
pub use registry::{PluginRegistry, Registration};
pub use resolver::Resolver;
pub use state::ActivationState;

/// Prelude for convenient imports
pub mod prelude {
    pub use super::events::{LifecycleSignals, PluginEvent, StartReport};
    pub use super::host::PluginHost;
    pub use super::plugin::{ActivationContext, AutoStart, Plugin, PluginDescriptor, Service};
    pub use super::state::ActivationState;
    pub use lab_core::{Error, Token};
}
