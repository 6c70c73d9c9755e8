//! Plugin descriptors and the activation contract

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use lab_core::token::{AnyToken, Token};

use crate::host::PluginHost;

/// When a plugin is activated without being asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "AutoStartRepr", into = "AutoStartRepr")]
pub enum AutoStart {
    /// Activated by `start()`
    Enabled,
    /// Only activated on request or when another plugin requires it
    #[default]
    Disabled,
    /// Activated by `restore_deferred()` once startup has settled
    Deferred,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AutoStartRepr {
    Flag(bool),
    Policy(String),
}

impl TryFrom<AutoStartRepr> for AutoStart {
    type Error = String;

    fn try_from(repr: AutoStartRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            AutoStartRepr::Flag(true) => Ok(AutoStart::Enabled),
            AutoStartRepr::Flag(false) => Ok(AutoStart::Disabled),
            AutoStartRepr::Policy(p) if p == "defer" => Ok(AutoStart::Deferred),
            AutoStartRepr::Policy(p) => Err(format!(
                "invalid auto_start '{}': expected true, false or \"defer\"",
                p
            )),
        }
    }
}

impl From<AutoStart> for AutoStartRepr {
    fn from(policy: AutoStart) -> Self {
        match policy {
            AutoStart::Enabled => AutoStartRepr::Flag(true),
            AutoStart::Disabled => AutoStartRepr::Flag(false),
            AutoStart::Deferred => AutoStartRepr::Policy("defer".to_string()),
        }
    }
}

impl From<bool> for AutoStart {
    fn from(flag: bool) -> Self {
        if flag {
            AutoStart::Enabled
        } else {
            AutoStart::Disabled
        }
    }
}

/// Resolved value of a plugin, shared by reference with every dependent
#[derive(Clone)]
pub struct Service {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Service {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// `TypeId` of the wrapped value
    pub fn value_type(&self) -> TypeId {
        (*self.value).type_id()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// True if both handles point at the same value
    pub fn ptr_eq(&self, other: &Service) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service({})", self.type_name)
    }
}

/// Everything a plugin receives when it is activated
pub struct ActivationContext {
    host: PluginHost,
    plugin_id: String,
    required: Vec<(AnyToken, Service)>,
    optional: Vec<(AnyToken, Option<Service>)>,
}

impl ActivationContext {
    pub(crate) fn new(
        host: PluginHost,
        plugin_id: String,
        required: Vec<(AnyToken, Service)>,
        optional: Vec<(AnyToken, Option<Service>)>,
    ) -> Self {
        Self {
            host,
            plugin_id,
            required,
            optional,
        }
    }

    pub fn host(&self) -> &PluginHost {
        &self.host
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Resolved dependencies in `requires` then `optional` order
    pub fn args(&self) -> Vec<Option<Service>> {
        self.required
            .iter()
            .map(|(_, service)| Some(service.clone()))
            .chain(self.optional.iter().map(|(_, service)| service.clone()))
            .collect()
    }

    /// Typed access to a required dependency
    pub fn require<T: Send + Sync + 'static>(&self, token: &Token<T>) -> Result<Arc<T>> {
        let (_, service) = self
            .required
            .iter()
            .find(|(t, _)| t.id() == token.id())
            .ok_or_else(|| {
                anyhow!(
                    "'{}' is not a required dependency of '{}'",
                    token.name(),
                    self.plugin_id
                )
            })?;
        service.downcast::<T>().ok_or_else(|| {
            anyhow!(
                "service for '{}' is a {}, not the declared type",
                token.name(),
                service.type_name()
            )
        })
    }

    /// Typed access to an optional dependency, `None` when it is unavailable
    pub fn optional<T: Send + Sync + 'static>(&self, token: &Token<T>) -> Option<Arc<T>> {
        self.optional
            .iter()
            .find(|(t, _)| t.id() == token.id())
            .and_then(|(_, service)| service.as_ref())
            .and_then(|service| service.downcast::<T>())
    }
}

/// Activation behavior of a plugin
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Produce the plugin's resolved value. Plugins that provide a token must
    /// return a service of that token's type.
    async fn activate(&self, ctx: ActivationContext) -> Result<Option<Service>>;

    /// Release whatever `activate` set up
    async fn deactivate(&self, _host: &PluginHost) -> Result<()> {
        Ok(())
    }
}

/// Activation closure type
pub type ActivateFn =
    Arc<dyn Fn(ActivationContext) -> BoxFuture<'static, Result<Option<Service>>> + Send + Sync>;

/// Deactivation closure type
pub type DeactivateFn = Arc<dyn Fn(PluginHost) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// [`Plugin`] implemented by closures
struct FnPlugin {
    activate: ActivateFn,
    deactivate: Option<DeactivateFn>,
}

#[async_trait]
impl Plugin for FnPlugin {
    async fn activate(&self, ctx: ActivationContext) -> Result<Option<Service>> {
        (self.activate)(ctx).await
    }

    async fn deactivate(&self, host: &PluginHost) -> Result<()> {
        match &self.deactivate {
            Some(deactivate) => deactivate(host.clone()).await,
            None => Ok(()),
        }
    }
}

/// Immutable plugin declaration
#[derive(Clone)]
pub struct PluginDescriptor {
    id: String,
    description: Option<String>,
    provides: Option<AnyToken>,
    requires: Vec<AnyToken>,
    optional: Vec<AnyToken>,
    auto_start: AutoStart,
    plugin: Arc<dyn Plugin>,
}

impl PluginDescriptor {
    pub fn builder(id: impl Into<String>) -> PluginDescriptorBuilder {
        PluginDescriptorBuilder {
            id: id.into(),
            description: None,
            provides: None,
            requires: Vec::new(),
            optional: Vec::new(),
            auto_start: AutoStart::default(),
            deactivate: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn provides(&self) -> Option<&AnyToken> {
        self.provides.as_ref()
    }

    pub fn requires(&self) -> &[AnyToken] {
        &self.requires
    }

    pub fn optional(&self) -> &[AnyToken] {
        &self.optional
    }

    pub fn auto_start(&self) -> AutoStart {
        self.auto_start
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Copy with a different auto-start policy, used when host configuration
    /// defers a plugin
    pub(crate) fn with_auto_start(&self, auto_start: AutoStart) -> Self {
        Self {
            auto_start,
            ..self.clone()
        }
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("id", &self.id)
            .field("provides", &self.provides)
            .field("requires", &self.requires)
            .field("optional", &self.optional)
            .field("auto_start", &self.auto_start)
            .finish()
    }
}

/// Builder for [`PluginDescriptor`]
pub struct PluginDescriptorBuilder {
    id: String,
    description: Option<String>,
    provides: Option<AnyToken>,
    requires: Vec<AnyToken>,
    optional: Vec<AnyToken>,
    auto_start: AutoStart,
    deactivate: Option<DeactivateFn>,
}

impl PluginDescriptorBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn provides(mut self, token: impl Into<AnyToken>) -> Self {
        self.provides = Some(token.into());
        self
    }

    pub fn requires(mut self, token: impl Into<AnyToken>) -> Self {
        self.requires.push(token.into());
        self
    }

    pub fn optional(mut self, token: impl Into<AnyToken>) -> Self {
        self.optional.push(token.into());
        self
    }

    pub fn auto_start(mut self, auto_start: impl Into<AutoStart>) -> Self {
        self.auto_start = auto_start.into();
        self
    }

    pub fn deactivate<F, Fut>(mut self, deactivate: F) -> Self
    where
        F: Fn(PluginHost) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.deactivate = Some(Arc::new(move |host| deactivate(host).boxed()));
        self
    }

    /// Finish with an activation closure
    pub fn activate<F, Fut>(self, activate: F) -> PluginDescriptor
    where
        F: Fn(ActivationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Service>>> + Send + 'static,
    {
        let deactivate = self.deactivate.clone();
        self.build(Arc::new(FnPlugin {
            activate: Arc::new(move |ctx| activate(ctx).boxed()),
            deactivate,
        }))
    }

    /// Finish with a [`Plugin`] implementation. Teardown comes from
    /// [`Plugin::deactivate`]; a closure passed to
    /// [`deactivate`](Self::deactivate) is not used.
    pub fn plugin(self, plugin: Arc<dyn Plugin>) -> PluginDescriptor {
        if self.deactivate.is_some() {
            warn!(
                "Plugin '{}' has a deactivate closure and a Plugin impl; using Plugin::deactivate",
                self.id
            );
        }
        self.build(plugin)
    }

    fn build(self, plugin: Arc<dyn Plugin>) -> PluginDescriptor {
        PluginDescriptor {
            id: self.id,
            description: self.description,
            provides: self.provides,
            requires: self.requires,
            optional: self.optional,
            auto_start: self.auto_start,
            plugin,
        }
    }
}
