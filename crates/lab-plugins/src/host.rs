//! Plugin host - registration, activation and deactivation
//!
//! The host owns the registry, one activation record per requested plugin and
//! the service table (token -> resolved value). Records and the service table
//! sit behind a mutex that is never held across an `.await`: every state
//! transition, including publishing the in-flight future for a plugin, happens
//! in one synchronous step. A second request that observes `Resolving` or
//! `Activating` therefore always finds the future the first request stored.
//!
//! ```rust
//! use lab_core::Token;
//! use lab_plugins::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> lab_core::Result<()> {
//! struct Greeter(&'static str);
//! let greeter: Token<Greeter> = Token::new("greeter");
//!
//! let host = PluginHost::new();
//! host.register(
//!     PluginDescriptor::builder("hello:greeter")
//!         .provides(&greeter)
//!         .auto_start(true)
//!         .activate(|_ctx| async move { Ok(Some(Service::new(Greeter("hi")))) }),
//! )?;
//!
//! let report = host.start().await;
//! assert!(report.is_success());
//! assert_eq!(host.resolve_required_service(&greeter).await?.0, "hi");
//! # Ok(())
//! # }
//! ```

use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use lab_core::config::HostConfig;
use lab_core::token::{AnyToken, Token, TokenId};
use lab_core::{Error, Result};

use crate::events::{ActivationFailure, LifecycleSignals, PluginEvent, StartReport};
use crate::plugin::{ActivationContext, AutoStart, PluginDescriptor, Service};
use crate::registry::{PluginRegistry, Registration};
use crate::resolver::Resolver;
use crate::state::{ActivationOutcome, ActivationRecord, ActivationState};

/// Requester name used when the host itself asks for a token
const HOST_REQUESTER: &str = "<host>";

#[derive(Default)]
struct EngineState {
    records: HashMap<String, ActivationRecord>,
    services: HashMap<TokenId, Service>,
    settled: bool,
}

struct HostInner {
    registry: RwLock<PluginRegistry>,
    state: Mutex<EngineState>,
    signals: LifecycleSignals,
    restored: watch::Sender<bool>,
}

/// Dependency-resolving, lazily-activating service host
#[derive(Clone)]
pub struct PluginHost {
    inner: Arc<HostInner>,
}

impl Default for PluginHost {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginHost {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        let (restored, _) = watch::channel(false);
        let signals = LifecycleSignals::new(config.signal_capacity);
        Self {
            inner: Arc::new(HostInner {
                registry: RwLock::new(PluginRegistry::new(config)),
                state: Mutex::new(EngineState::default()),
                signals,
                restored,
            }),
        }
    }

    pub fn signals(&self) -> &LifecycleSignals {
        &self.inner.signals
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a plugin. Plugins disabled by configuration are skipped.
    pub fn register(&self, descriptor: PluginDescriptor) -> Result<()> {
        let id = descriptor.id().to_string();
        let outcome = self.registry_mut().register(descriptor)?;

        if outcome == Registration::Registered {
            info!("Registered plugin: {}", id);
            self.emit(PluginEvent::Registered { plugin: id });
        }
        Ok(())
    }

    /// Register several plugins, stopping at the first error
    pub fn register_plugins<I>(&self, descriptors: I) -> Result<()>
    where
        I: IntoIterator<Item = PluginDescriptor>,
    {
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        Ok(())
    }

    /// Remove a plugin, deactivating it first if it is active
    #[instrument(skip(self), fields(plugin = %id))]
    pub async fn unregister_plugin(&self, id: &str) -> Result<()> {
        self.registry().get(id)?;

        // Let a running activation finish so its result lands on a live record.
        let in_flight = self.state().records.get(id).and_then(|r| r.in_flight.clone());
        if let Some(in_flight) = in_flight {
            let _ = in_flight.await;
        }

        if self.is_plugin_activated(id) {
            self.deactivate_plugin(id).await?;
        }

        self.registry_mut().unregister(id)?;
        self.state().records.remove(id);

        info!("Unregistered plugin: {}", id);
        self.emit(PluginEvent::Deregistered {
            plugin: id.to_string(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn has_plugin(&self, id: &str) -> bool {
        self.registry().has(id)
    }

    /// Registered ids in registration order
    pub fn list_plugins(&self) -> Vec<String> {
        self.registry().list()
    }

    /// Ids skipped because configuration disables them
    pub fn disabled_plugins(&self) -> Vec<String> {
        self.registry().disabled().to_vec()
    }

    pub fn plugin_description(&self, id: &str) -> Option<String> {
        self.registry()
            .get(id)
            .ok()
            .and_then(|d| d.description().map(str::to_string))
    }

    pub fn descriptor(&self, id: &str) -> Result<Arc<PluginDescriptor>> {
        self.registry().get(id)
    }

    pub fn is_plugin_activated(&self, id: &str) -> bool {
        self.state()
            .records
            .get(id)
            .is_some_and(|r| r.state == ActivationState::Activated)
    }

    /// Current state, `None` if the plugin is not registered
    pub fn plugin_state(&self, id: &str) -> Option<ActivationState> {
        if !self.has_plugin(id) {
            return None;
        }
        Some(
            self.state()
                .records
                .get(id)
                .map(|r| r.state)
                .unwrap_or(ActivationState::Registered),
        )
    }

    /// Activation order for `ids` without activating anything
    pub fn plan_for<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<String>> {
        let registry = self.registry();
        Resolver::new(&registry).plan_for(ids)
    }

    /// True once the initial auto-start plan has settled
    pub fn is_restored(&self) -> bool {
        *self.inner.restored.borrow()
    }

    /// Completes once `all_auto_start_settled` has fired
    pub async fn restored(&self) {
        let mut rx = self.inner.restored.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|restored| *restored).await;
    }

    // ------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------

    /// Activate a plugin and everything it depends on.
    ///
    /// Concurrent requests for the same id share one execution of `activate`.
    /// Returns the plugin's resolved value.
    #[instrument(skip(self), fields(plugin = %id))]
    pub async fn activate_plugin(&self, id: &str) -> Result<Option<Service>> {
        self.request(id.to_string(), Vec::new()).await
    }

    /// Activate every `AutoStart::Enabled` plugin.
    ///
    /// Never fails as a whole: each plugin's outcome is collected in the report
    /// and failures are also broadcast on `plugin_activation_failed`. The first
    /// call fires `all_auto_start_settled` once everything has settled.
    pub async fn start(&self) -> StartReport {
        let ids = self.registry().list_auto_start();
        info!("Starting {} auto-start plugins", ids.len());

        let report = self.activate_all(ids).await;

        let first = {
            let mut state = self.state();
            !std::mem::replace(&mut state.settled, true)
        };
        if first {
            info!(
                activated = report.activated.len(),
                failed = report.failed.len(),
                "Auto-start plugins settled"
            );
            self.inner.restored.send_replace(true);
            self.emit(PluginEvent::AutoStartSettled(report.clone()));
        }

        report
    }

    /// Once startup has settled, activate every deferred plugin not yet active
    pub async fn restore_deferred(&self) -> StartReport {
        self.restored().await;

        let pending: Vec<String> = {
            let ids = self.registry().list_by_policy(AutoStart::Deferred);
            let state = self.state();
            ids.into_iter()
                .filter(|id| {
                    state
                        .records
                        .get(id)
                        .map_or(true, |r| r.state != ActivationState::Activated)
                })
                .collect()
        };
        info!("Restoring {} deferred plugins", pending.len());

        self.activate_all(pending).await
    }

    /// Activate the provider of `token` and return its service
    pub async fn resolve_required_service<T: Send + Sync + 'static>(
        &self,
        token: &Token<T>,
    ) -> Result<Arc<T>> {
        let erased = token.erase();
        let provider = self
            .registry()
            .provider_of(&erased)
            .map(str::to_string)
            .ok_or_else(|| Error::UnresolvedDependency {
                plugin: HOST_REQUESTER.to_string(),
                token: token.name().to_string(),
            })?;

        let service = self
            .request(provider.clone(), Vec::new())
            .await?
            .ok_or_else(|| Error::MissingService {
                plugin: provider,
                token: token.name().to_string(),
            })?;

        service
            .downcast::<T>()
            .ok_or_else(|| Error::ServiceTypeMismatch {
                token: token.name().to_string(),
                expected: erased.service_type_name().to_string(),
            })
    }

    /// Like [`resolve_required_service`](Self::resolve_required_service), but
    /// absence or failure yields `None`
    pub async fn resolve_optional_service<T: Send + Sync + 'static>(
        &self,
        token: &Token<T>,
    ) -> Option<Arc<T>> {
        match self.resolve_required_service(token).await {
            Ok(service) => Some(service),
            Err(e) => {
                debug!(token = %token.name(), "Optional service unavailable: {}", e);
                None
            }
        }
    }

    /// Activate `ids` following one combined plan. If the ids cannot be
    /// planned together, each is requested on its own so one bad plugin does
    /// not hold back the rest.
    async fn activate_all(&self, ids: Vec<String>) -> StartReport {
        let order = match self.plan_for(&ids) {
            Ok(plan) => {
                info!(plan = ?plan, "Activating {} plugins", plan.len());
                plan
            }
            Err(e) => {
                warn!(code = e.code(), "Cannot plan startup as a whole: {}", e);
                ids.clone()
            }
        };

        let requests = order.iter().map(|id| self.request(id.clone(), Vec::new()));
        let mut outcomes: HashMap<String, ActivationOutcome> =
            order.iter().cloned().zip(join_all(requests).await).collect();

        let mut report = StartReport::default();
        for id in ids {
            match outcomes
                .remove(&id)
                .unwrap_or_else(|| Err(Error::not_found(format!("plugin '{}'", id))))
            {
                Ok(_) => report.activated.push(id),
                Err(e) => report.failed.push((id, e)),
            }
        }
        report
    }

    /// Join or start the activation of `id`. `chain` lists the plugins whose
    /// activation is waiting on this request.
    fn request(&self, id: String, chain: Vec<String>) -> BoxFuture<'static, ActivationOutcome> {
        if !self.has_plugin(&id) {
            return futures::future::ready(Err(Error::not_found(format!("plugin '{}'", id))))
                .boxed();
        }

        let mut state = self.state();
        let record = state.records.entry(id.clone()).or_default();

        match record.state {
            ActivationState::Activated => {
                return futures::future::ready(Ok(record.service.clone())).boxed();
            }
            ActivationState::Failed => {
                let error = record
                    .failure
                    .clone()
                    .unwrap_or_else(|| Error::not_found(format!("failure of '{}'", id)));
                return futures::future::ready(Err(error)).boxed();
            }
            ActivationState::Deactivating => {
                return futures::future::ready(Err(Error::Deactivating(id))).boxed();
            }
            ActivationState::Resolving | ActivationState::Activating => {
                if let Some(in_flight) = &record.in_flight {
                    debug!(plugin = %id, "Joining in-flight activation");
                    return in_flight.clone().boxed();
                }
            }
            ActivationState::Registered => {}
        }

        let in_flight = self.clone().run_activation(id, chain).boxed().shared();
        record.begin(in_flight.clone());
        drop(state);

        in_flight.boxed()
    }

    async fn run_activation(self, id: String, mut chain: Vec<String>) -> ActivationOutcome {
        let descriptor = match self.registry().get(&id) {
            Ok(descriptor) => descriptor,
            Err(e) => return self.finish_failure(&id, e),
        };

        chain.push(id.clone());
        match self.activate_resolved(&descriptor, &chain).await {
            Ok(service) => self.finish_success(&descriptor, service),
            Err(e) => self.finish_failure(&id, e),
        }
    }

    async fn activate_resolved(
        &self,
        descriptor: &PluginDescriptor,
        chain: &[String],
    ) -> Result<Option<Service>> {
        let id = descriptor.id().to_string();

        // Plan and pick providers while holding the registry lock once.
        let (required, optional) = {
            let registry = self.registry();
            let plan = Resolver::new(&registry).plan_for(&[id.as_str()])?;
            debug!(plugin = %id, plan = ?plan, "Resolved activation plan");

            let required: Vec<(AnyToken, String)> = descriptor
                .requires()
                .iter()
                .map(|token| {
                    registry
                        .provider_of(token)
                        .map(|provider| (token.clone(), provider.to_string()))
                        .ok_or_else(|| Error::UnresolvedDependency {
                            plugin: id.clone(),
                            token: token.name().to_string(),
                        })
                })
                .collect::<Result<_>>()?;

            let optional: Vec<(AnyToken, Option<String>)> = descriptor
                .optional()
                .iter()
                .map(|token| {
                    let provider = registry
                        .provider_of(token)
                        .filter(|provider| plan.iter().any(|p| p == provider))
                        .map(str::to_string);
                    (token.clone(), provider)
                })
                .collect();

            (required, optional)
        };

        let mut resolved_required = Vec::with_capacity(required.len());
        for (token, provider) in required {
            let service = match self.request(provider.clone(), chain.to_vec()).await {
                Ok(Some(service)) => service,
                Ok(None) => {
                    return Err(Error::MissingService {
                        plugin: provider,
                        token: token.name().to_string(),
                    })
                }
                Err(e) => {
                    return Err(Error::DependencyFailed {
                        plugin: id,
                        dependency: provider,
                        reason: e.to_string(),
                    })
                }
            };
            resolved_required.push((token, service));
        }

        let mut resolved_optional = Vec::with_capacity(optional.len());
        for (token, provider) in optional {
            let service = match provider {
                Some(provider) if self.would_wait_on(&id, &provider, chain) => {
                    debug!(
                        plugin = %id,
                        optional = %provider,
                        "Optional dependency is waiting on this plugin, skipping"
                    );
                    self.active_service(&token)
                }
                Some(provider) => match self.request(provider.clone(), chain.to_vec()).await {
                    Ok(service) => service,
                    Err(e) => {
                        warn!(
                            plugin = %id,
                            optional = %provider,
                            "Optional dependency unavailable: {}",
                            e
                        );
                        None
                    }
                },
                // Not planned (absent, deferred or unplannable); use it only if
                // it is already active.
                None => self.active_service(&token),
            };
            resolved_optional.push((token, service));
        }

        if let Some(record) = self.state().records.get_mut(&id) {
            record.state = ActivationState::Activating;
        }
        debug!(plugin = %id, "Invoking activate");
        self.emit(PluginEvent::Activating { plugin: id.clone() });

        let ctx = ActivationContext::new(self.clone(), id.clone(), resolved_required, resolved_optional);
        let service = descriptor
            .plugin()
            .activate(ctx)
            .await
            .map_err(|e| Error::activation(&id, &e))?;

        if let Some(token) = descriptor.provides() {
            let service = service.as_ref().ok_or_else(|| Error::MissingService {
                plugin: id.clone(),
                token: token.name().to_string(),
            })?;
            if service.value_type() != token.service_type() {
                return Err(Error::ServiceTypeMismatch {
                    token: token.name().to_string(),
                    expected: token.service_type_name().to_string(),
                });
            }
        }

        Ok(service)
    }

    fn finish_success(&self, descriptor: &PluginDescriptor, service: Option<Service>) -> ActivationOutcome {
        let id = descriptor.id().to_string();
        {
            let mut state = self.state();
            if let (Some(token), Some(service)) = (descriptor.provides(), service.as_ref()) {
                state.services.insert(token.id(), service.clone());
            }
            state.records.entry(id.clone()).or_default().succeed(service.clone());
        }

        info!("Activated plugin: {}", id);
        self.emit(PluginEvent::Activated { plugin: id });
        Ok(service)
    }

    fn finish_failure(&self, id: &str, error: Error) -> ActivationOutcome {
        self.state()
            .records
            .entry(id.to_string())
            .or_default()
            .fail(error.clone());

        warn!(code = error.code(), "Plugin '{}' failed: {}", id, error);
        self.emit(PluginEvent::ActivationFailed(ActivationFailure {
            plugin: id.to_string(),
            error: error.clone(),
        }));
        Err(error)
    }

    // ------------------------------------------------------------------
    // Deactivation
    // ------------------------------------------------------------------

    /// Deactivate an active plugin.
    ///
    /// Fails with `InUse` while any active plugin requires its token. Returns
    /// `Ok(false)` if the plugin was not active.
    #[instrument(skip(self), fields(plugin = %id))]
    pub async fn deactivate_plugin(&self, id: &str) -> Result<bool> {
        let (descriptor, dependents) = {
            let registry = self.registry();
            (registry.get(id)?, registry.dependents_of(id))
        };

        {
            let mut state = self.state();

            let active_dependents: Vec<String> = dependents
                .into_iter()
                .filter(|d| {
                    state.records.get(d).is_some_and(|r| {
                        r.state == ActivationState::Activated || r.state.is_in_flight()
                    })
                })
                .collect();

            let Some(record) = state.records.get_mut(id) else {
                return Ok(false);
            };
            match record.state {
                ActivationState::Activated => {}
                ActivationState::Deactivating => return Err(Error::Deactivating(id.to_string())),
                _ => return Ok(false),
            }

            if !active_dependents.is_empty() {
                return Err(Error::InUse {
                    plugin: id.to_string(),
                    dependents: active_dependents,
                });
            }

            record.state = ActivationState::Deactivating;
        }

        if let Err(e) = descriptor.plugin().deactivate(self).await {
            if let Some(record) = self.state().records.get_mut(id) {
                record.state = ActivationState::Activated;
            }
            let error = Error::deactivation(id, &e);
            warn!("{}", error);
            return Err(error);
        }

        {
            let mut state = self.state();
            if let Some(token) = descriptor.provides() {
                state.services.remove(&token.id());
            }
            if let Some(record) = state.records.get_mut(id) {
                record.reset();
            }
        }

        info!("Deactivated plugin: {}", id);
        self.emit(PluginEvent::Deactivated {
            plugin: id.to_string(),
        });
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// True if awaiting `provider` could end up awaiting `id` itself: the
    /// provider is already part of the requesting chain, or it is activating
    /// elsewhere and its own plan goes through `id`.
    fn would_wait_on(&self, id: &str, provider: &str, chain: &[String]) -> bool {
        if chain.iter().any(|waiting| waiting == provider) {
            return true;
        }

        let in_flight = self
            .state()
            .records
            .get(provider)
            .is_some_and(|r| r.state.is_in_flight());
        if !in_flight {
            return false;
        }

        let registry = self.registry();
        Resolver::new(&registry)
            .plan_for(&[provider])
            .is_ok_and(|plan| plan.iter().any(|p| p == id))
    }

    fn active_service(&self, token: &AnyToken) -> Option<Service> {
        self.state().services.get(&token.id()).cloned()
    }

    fn emit(&self, event: PluginEvent) {
        self.inner.signals.emit(event);
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn registry(&self) -> RwLockReadGuard<'_, PluginRegistry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, PluginRegistry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
