//! Activation planning
//!
//! Depth-first traversal with white/gray/black coloring. Roots are visited in
//! the order given, dependencies in the order a descriptor lists them
//! (`requires` first, then `optional`), so a registration sequence always
//! yields the same plan.

use std::collections::HashMap;
use tracing::debug;

use lab_core::{Error, Result};

use crate::plugin::AutoStart;
use crate::registry::PluginRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

/// Traversal state; cloned to explore an optional edge tentatively
#[derive(Clone, Default)]
struct Walk {
    colors: HashMap<String, Color>,
    path: Vec<String>,
    order: Vec<String>,
}

/// Computes activation order from the registry's dependency edges
pub struct Resolver<'a> {
    registry: &'a PluginRegistry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self { registry }
    }

    /// Order in which `ids` and everything they depend on must activate.
    ///
    /// Hard dependencies always appear before their dependents; a missing
    /// provider for a required token or a cycle through required tokens is an
    /// error. Optional providers are included when they can be planned and
    /// are not deferred, otherwise they are left out.
    pub fn plan_for<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<String>> {
        let mut walk = Walk::default();

        for id in ids {
            let id = id.as_ref();
            self.registry.get(id)?;
            self.visit(id, &mut walk)?;
        }

        debug!(plan = ?walk.order, "Computed activation plan");
        Ok(walk.order)
    }

    fn visit(&self, id: &str, walk: &mut Walk) -> Result<()> {
        match walk.colors.get(id) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => {
                let start = walk.path.iter().position(|p| p == id).unwrap_or(0);
                let mut cycle: Vec<String> = walk.path[start..].to_vec();
                cycle.push(id.to_string());
                return Err(Error::CyclicDependency { path: cycle });
            }
            None => {}
        }

        let descriptor = self.registry.get(id)?;
        walk.colors.insert(id.to_string(), Color::Gray);
        walk.path.push(id.to_string());

        for token in descriptor.requires() {
            let provider = self.registry.provider_of(token).ok_or_else(|| {
                Error::UnresolvedDependency {
                    plugin: id.to_string(),
                    token: token.name().to_string(),
                }
            })?;
            self.visit(provider, walk)?;
        }

        for token in descriptor.optional() {
            let Some(provider) = self.registry.provider_of(token) else {
                continue;
            };

            let deferred = self
                .registry
                .get(provider)
                .map(|d| d.auto_start() == AutoStart::Deferred)
                .unwrap_or(true);
            if deferred && walk.colors.get(provider) != Some(&Color::Black) {
                continue;
            }

            let mut attempt = walk.clone();
            match self.visit(provider, &mut attempt) {
                Ok(()) => *walk = attempt,
                Err(e) => {
                    debug!(
                        plugin = %id,
                        optional = %provider,
                        "Leaving optional dependency out of plan: {}",
                        e
                    );
                }
            }
        }

        walk.path.pop();
        walk.colors.insert(id.to_string(), Color::Black);
        walk.order.push(id.to_string());
        Ok(())
    }
}
