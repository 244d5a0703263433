use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hydrix_model::{PluginConfig, PluginDescriptor, PluginFilter};

use crate::error::{Result, ScanError};

/// Storage-facing view of the plugin catalog.
#[async_trait]
pub trait PluginCatalog: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<PluginDescriptor>>;
    async fn query(&self, filter: &PluginFilter) -> Result<Vec<PluginDescriptor>>;
    async fn upsert(&self, plugin: &PluginDescriptor) -> Result<()>;
    async fn list(&self) -> Result<Vec<PluginDescriptor>>;
}

/// In-memory catalog used in tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryPluginCatalog {
    plugins: DashMap<String, PluginDescriptor>,
}

impl MemoryPluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginCatalog for MemoryPluginCatalog {
    async fn get(&self, name: &str) -> Result<Option<PluginDescriptor>> {
        Ok(self.plugins.get(name).map(|entry| entry.value().clone()))
    }

    async fn query(&self, filter: &PluginFilter) -> Result<Vec<PluginDescriptor>> {
        let mut matched: Vec<PluginDescriptor> = self
            .plugins
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matched)
    }

    async fn upsert(&self, plugin: &PluginDescriptor) -> Result<()> {
        self.plugins.insert(plugin.name.clone(), plugin.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PluginDescriptor>> {
        self.query(&PluginFilter::default()).await
    }
}

/// Resolves plugin selections against a catalog at task start.
#[derive(Clone)]
pub struct PluginSource {
    catalog: Arc<dyn PluginCatalog>,
}

impl fmt::Debug for PluginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSource").finish_non_exhaustive()
    }
}

impl PluginSource {
    pub fn new(catalog: Arc<dyn PluginCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn PluginCatalog> {
        &self.catalog
    }

    /// Resolves a selection for a fresh run. Explicit names come first in
    /// request order; filter matches follow in catalog order, minus any
    /// duplicates. Unknown explicit names are logged and skipped so a stale
    /// client list does not abort the whole run.
    pub async fn resolve(&self, config: &PluginConfig) -> Result<Vec<Arc<PluginDescriptor>>> {
        let mut resolved = Vec::new();
        let mut seen = HashSet::new();

        for name in &config.names {
            match self.catalog.get(name).await? {
                Some(plugin) => {
                    if seen.insert(plugin.name.clone()) {
                        resolved.push(Arc::new(plugin));
                    }
                }
                None => {
                    tracing::warn!(target: "scan::dispatch", plugin = %name, "unknown plugin skipped");
                }
            }
        }

        if let Some(filter) = &config.filter {
            for plugin in self.catalog.query(filter).await? {
                if seen.insert(plugin.name.clone()) {
                    resolved.push(Arc::new(plugin));
                }
            }
        }

        Ok(resolved)
    }

    /// Resolves the frozen plugin list of a stored task. Any missing name
    /// is fatal: the recorded plugin sequence cannot be reproduced.
    pub async fn resolve_exact(&self, names: &[String]) -> Result<Vec<Arc<PluginDescriptor>>> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            match self.catalog.get(name).await? {
                Some(plugin) => resolved.push(Arc::new(plugin)),
                None => {
                    return Err(ScanError::Config(format!(
                        "plugin {name} is no longer available"
                    )));
                }
            }
        }
        Ok(resolved)
    }
}

/// Frozen plugin sequence replayed against every target of one task.
#[derive(Clone, Debug)]
pub struct PluginReplay {
    plugins: Arc<Vec<Arc<PluginDescriptor>>>,
}

impl PluginReplay {
    pub fn new(plugins: Vec<Arc<PluginDescriptor>>) -> Self {
        Self {
            plugins: Arc::new(plugins),
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<PluginDescriptor>> + '_ {
        self.plugins.iter().map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrix_model::PluginKind;

    async fn seeded_catalog() -> Arc<MemoryPluginCatalog> {
        let catalog = Arc::new(MemoryPluginCatalog::new());
        for (name, kind) in [
            ("headers-probe", PluginKind::HttpProbe),
            ("tls-probe", PluginKind::HttpProbe),
            ("syn-sweep", PluginKind::PortScan),
        ] {
            catalog
                .upsert(&PluginDescriptor::new(name, kind, "{}"))
                .await
                .unwrap();
        }
        catalog
    }

    #[tokio::test]
    async fn explicit_names_resolve_in_request_order() {
        let source = PluginSource::new(seeded_catalog().await);
        let config = PluginConfig {
            names: vec!["tls-probe".into(), "headers-probe".into()],
            filter: None,
        };
        let plugins = source.resolve(&config).await.unwrap();
        let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["tls-probe", "headers-probe"]);
    }

    #[tokio::test]
    async fn unknown_names_are_skipped_and_filter_fills_in() {
        let source = PluginSource::new(seeded_catalog().await);
        let config = PluginConfig {
            names: vec!["missing".into(), "syn-sweep".into()],
            filter: Some(PluginFilter {
                kinds: vec![PluginKind::HttpProbe],
                keyword: None,
            }),
        };
        let plugins = source.resolve(&config).await.unwrap();
        let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["syn-sweep", "headers-probe", "tls-probe"]);
    }

    #[tokio::test]
    async fn filter_keyword_is_case_insensitive() {
        let source = PluginSource::new(seeded_catalog().await);
        let config = PluginConfig {
            names: Vec::new(),
            filter: Some(PluginFilter {
                kinds: Vec::new(),
                keyword: Some("TLS".into()),
            }),
        };
        let plugins = source.resolve(&config).await.unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "tls-probe");
    }

    #[tokio::test]
    async fn exact_resolution_fails_on_missing_plugins() {
        let source = PluginSource::new(seeded_catalog().await);
        let err = source
            .resolve_exact(&["headers-probe".into(), "gone".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[tokio::test]
    async fn replay_preserves_sequence_for_every_pass() {
        let source = PluginSource::new(seeded_catalog().await);
        let plugins = source
            .resolve_exact(&["syn-sweep".into(), "tls-probe".into()])
            .await
            .unwrap();
        let replay = PluginReplay::new(plugins);
        assert_eq!(replay.len(), 2);
        for _ in 0..2 {
            let names: Vec<String> = replay.iter().map(|p| p.name.clone()).collect();
            assert_eq!(names, replay.names());
        }
    }
}
