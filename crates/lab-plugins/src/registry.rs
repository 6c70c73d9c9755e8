//! Plugin registry
//!
//! Stores descriptors by id and indexes provided tokens. The registry only
//! validates what can be checked in isolation; whether a required token has a
//! provider is decided later by the resolver, since plugins register in no
//! particular order.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use lab_core::config::HostConfig;
use lab_core::token::AnyToken;
use lab_core::{Error, Result};

use crate::plugin::{AutoStart, PluginDescriptor};

/// What happened to a descriptor passed to [`PluginRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// Skipped because host configuration disables it
    Disabled,
}

/// Plugin registry - descriptors by id, providers by token
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<PluginDescriptor>>,
    /// Registration order
    order: Vec<String>,
    providers: HashMap<AnyToken, String>,
    disabled: Vec<String>,
    config: HostConfig,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl PluginRegistry {
    pub fn new(config: HostConfig) -> Self {
        Self {
            plugins: HashMap::new(),
            order: Vec::new(),
            providers: HashMap::new(),
            disabled: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Register a descriptor
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<Registration> {
        let id = descriptor.id().to_string();

        if self.plugins.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }

        if let Some(token) = descriptor.provides() {
            if descriptor
                .requires()
                .iter()
                .chain(descriptor.optional())
                .any(|dep| dep == token)
            {
                return Err(Error::SelfDependency {
                    plugin: id,
                    token: token.name().to_string(),
                });
            }

            if let Some(existing) = self.providers.get(token) {
                return Err(Error::DuplicateProvider {
                    plugin: id,
                    token: token.name().to_string(),
                    existing: existing.clone(),
                });
            }
        }

        if self.config.is_disabled(&id) {
            info!("Plugin '{}' is disabled by configuration, skipping", id);
            if !self.disabled.contains(&id) {
                self.disabled.push(id);
            }
            return Ok(Registration::Disabled);
        }

        let descriptor = if descriptor.auto_start() != AutoStart::Deferred
            && self.config.is_deferred(&id)
        {
            debug!("Plugin '{}' deferred by configuration", id);
            descriptor.with_auto_start(AutoStart::Deferred)
        } else {
            descriptor
        };

        if let Some(token) = descriptor.provides() {
            self.providers.insert(token.clone(), id.clone());
        }
        self.order.push(id.clone());
        self.plugins.insert(id.clone(), Arc::new(descriptor));

        debug!("Registered plugin: {}", id);
        Ok(Registration::Registered)
    }

    /// Remove a descriptor and its token index entry
    pub fn unregister(&mut self, id: &str) -> Result<Arc<PluginDescriptor>> {
        let descriptor = self
            .plugins
            .remove(id)
            .ok_or_else(|| Error::not_found(format!("plugin '{}'", id)))?;

        if let Some(token) = descriptor.provides() {
            self.providers.remove(token);
        }
        self.order.retain(|existing| existing != id);

        Ok(descriptor)
    }

    pub fn has(&self, id: &str) -> bool {
        self.plugins.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Result<Arc<PluginDescriptor>> {
        self.plugins
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("plugin '{}'", id)))
    }

    /// Id of the plugin providing `token`, if one is registered yet
    pub fn provider_of(&self, token: &AnyToken) -> Option<&str> {
        self.providers.get(token).map(String::as_str)
    }

    /// Ids with `AutoStart::Enabled`, in registration order
    pub fn list_auto_start(&self) -> Vec<String> {
        self.list_by_policy(AutoStart::Enabled)
    }

    pub fn list_by_policy(&self, policy: AutoStart) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.plugins
                    .get(id.as_str())
                    .is_some_and(|d| d.auto_start() == policy)
            })
            .cloned()
            .collect()
    }

    /// All ids in registration order
    pub fn list(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Ids skipped because configuration disables them
    pub fn disabled(&self) -> &[String] {
        &self.disabled
    }

    /// Plugins whose `requires` names the token `id` provides
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let Some(token) = self.plugins.get(id).and_then(|d| d.provides().cloned()) else {
            return Vec::new();
        };

        self.order
            .iter()
            .filter(|other| {
                self.plugins
                    .get(other.as_str())
                    .is_some_and(|d| d.requires().contains(&token))
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
