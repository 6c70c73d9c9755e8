//! Plugin manifests
//!
//! A manifest declares synthetic plugins in TOML so dependency graphs can be
//! planned and started from the command line:
//!
//! ```toml
//! [[plugin]]
//! id = "@lab/docmanager:plugin"
//! provides = "docmanager"
//! requires = ["registry"]
//! optional = ["status-bar"]
//! auto_start = true
//! delay_ms = 50
//! ```
//!
//! Every distinct token name maps to one `Token<String>` per loaded manifest.
//! The service a plugin provides is a string naming the plugin and the
//! services it was given.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use lab_core::{HostConfig, Result, Token};
use lab_plugins::{AutoStart, PluginDescriptor, PluginHost, Service};

/// One `[[plugin]]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginEntry {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provides: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub auto_start: AutoStart,
    /// Make `activate` return an error
    #[serde(default)]
    pub fail: bool,
    /// Simulated activation work
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "plugin")]
    pub plugins: Vec<PluginEntry>,
}

impl Manifest {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Ids with `auto_start = true`, in manifest order
    pub fn auto_start_ids(&self) -> Vec<String> {
        self.plugins
            .iter()
            .filter(|p| p.auto_start == AutoStart::Enabled)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Build a host and register every entry
    pub fn into_host(self, config: HostConfig) -> Result<PluginHost> {
        let host = PluginHost::with_config(config);
        let mut tokens: HashMap<String, Token<String>> = HashMap::new();
        let mut token = |name: &str| {
            tokens
                .entry(name.to_string())
                .or_insert_with(|| Token::new(name))
                .clone()
        };

        let mut descriptors = Vec::with_capacity(self.plugins.len());
        for entry in self.plugins {
            let mut builder = PluginDescriptor::builder(entry.id.clone()).auto_start(entry.auto_start);
            if let Some(description) = &entry.description {
                builder = builder.description(description.clone());
            }
            if let Some(name) = &entry.provides {
                builder = builder.provides(&token(name));
            }
            for name in &entry.requires {
                builder = builder.requires(&token(name));
            }
            for name in &entry.optional {
                builder = builder.optional(&token(name));
            }

            descriptors.push(builder.activate(move |ctx| {
                let entry = entry.clone();
                async move { simulate(entry, ctx).await }
            }));
        }

        host.register_plugins(descriptors)?;
        Ok(host)
    }
}

async fn simulate(
    entry: PluginEntry,
    ctx: lab_plugins::ActivationContext,
) -> anyhow::Result<Option<Service>> {
    if entry.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(entry.delay_ms)).await;
    }
    if entry.fail {
        anyhow::bail!("'{}' is configured to fail", entry.id);
    }

    let inputs: Vec<String> = ctx
        .args()
        .iter()
        .map(|arg| {
            arg.as_ref()
                .and_then(|s| s.downcast::<String>())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string())
        })
        .collect();
    debug!(plugin = %entry.id, inputs = ?inputs, "Simulated activation");

    Ok(entry
        .provides
        .as_ref()
        .map(|_| Service::new(format!("{}({})", entry.id, inputs.join(",")))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_core::Error;
    use std::io::Write;

    const GRAPH: &str = r#"
        [[plugin]]
        id = "services"
        provides = "services"

        [[plugin]]
        id = "docs"
        provides = "docs"
        requires = ["services"]
        optional = ["status"]
        auto_start = true

        [[plugin]]
        id = "status"
        provides = "status"
        auto_start = "defer"

        [[plugin]]
        id = "broken"
        auto_start = true
        fail = true
    "#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_toml_str(GRAPH).unwrap();
        assert_eq!(manifest.plugins.len(), 4);
        assert_eq!(manifest.plugins[2].auto_start, AutoStart::Deferred);
        assert_eq!(manifest.auto_start_ids(), vec!["docs", "broken"]);
    }

    #[test]
    fn test_unknown_field_is_config_error() {
        let err = Manifest::from_toml_str("[[plugin]]\nid = \"a\"\nprovide = \"x\"\n").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GRAPH.as_bytes()).unwrap();
        let manifest = Manifest::load(file.path()).unwrap();
        assert_eq!(manifest.plugins[0].id, "services");

        assert!(matches!(
            Manifest::load("/nonexistent/manifest.toml"),
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_manifest_host_starts_graph() {
        let host = Manifest::from_toml_str(GRAPH)
            .unwrap()
            .into_host(HostConfig::default())
            .unwrap();

        assert_eq!(host.plan_for(&["docs"]).unwrap(), vec!["services", "docs"]);

        let report = host.start().await;
        assert_eq!(report.activated, vec!["docs"]);
        assert_eq!(report.failed[0].0, "broken");

        let docs = host.activate_plugin("docs").await.unwrap().unwrap();
        assert_eq!(
            *docs.downcast::<String>().unwrap(),
            "docs(services(),-)"
        );

        let restored = host.restore_deferred().await;
        assert_eq!(restored.activated, vec!["status"]);
    }

    #[test]
    fn test_duplicate_provider_in_manifest() {
        let manifest = Manifest::from_toml_str(
            r#"
            [[plugin]]
            id = "a"
            provides = "x"

            [[plugin]]
            id = "b"
            provides = "x"
            "#,
        )
        .unwrap();
        assert!(matches!(
            manifest.into_host(HostConfig::default()),
            Err(Error::DuplicateProvider { .. })
        ));
    }
}
