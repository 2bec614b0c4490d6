//! HandlerContainer - content type id から handler を引く
//!
//! # 構成
//! - handler は設定ディレクトリの JSON descriptor で宣言する
//! - 実体はコードで登録した factory が作る
//!
//! ```json
//! { "enabled": true, "handler": "rpm", "types": ["rpm", "srpm"], "settings": {} }
//! ```
//!
//! # load
//! `load()` は新しい index を丸ごと作って差し替える（merge しない）。
//! 差し替えまでは `find` は古い index を見る。

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::handler::{ContentHandler, HandlerError};
use crate::error::{Result, StewardError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Directories scanned for `*.json` descriptors, in order.
    pub locations: Vec<PathBuf>,
}

impl ContainerConfig {
    pub fn with_location(mut self, dir: impl Into<PathBuf>) -> Self {
        self.locations.push(dir.into());
        self
    }
}

fn enabled_by_default() -> bool {
    true
}

/// One descriptor file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HandlerDescriptor {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Name of the factory that builds the handler.
    pub handler: String,

    /// Type ids this handler serves.
    pub types: Vec<String>,

    #[serde(default)]
    pub settings: Value,

    #[serde(skip)]
    pub path: PathBuf,
}

impl HandlerDescriptor {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bad = |reason: String| StewardError::Descriptor {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| bad(e.to_string()))?;
        let mut descriptor: HandlerDescriptor =
            serde_json::from_str(&text).map_err(|e| bad(e.to_string()))?;
        if descriptor.types.iter().any(|t| t.trim().is_empty()) {
            return Err(bad("empty type id".into()));
        }
        descriptor.path = path.to_path_buf();
        Ok(descriptor)
    }
}

/// Builds a handler instance for one type id of a descriptor.
pub trait HandlerFactory: Send + Sync {
    fn create(
        &self,
        type_id: &str,
        descriptor: &HandlerDescriptor,
    ) -> std::result::Result<Arc<dyn ContentHandler>, HandlerError>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&str, &HandlerDescriptor) -> std::result::Result<Arc<dyn ContentHandler>, HandlerError>
        + Send
        + Sync,
{
    fn create(
        &self,
        type_id: &str,
        descriptor: &HandlerDescriptor,
    ) -> std::result::Result<Arc<dyn ContentHandler>, HandlerError> {
        self(type_id, descriptor)
    }
}

/// What a `load()` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Type ids in the new index, sorted.
    pub loaded: Vec<String>,

    /// Descriptor files that were ignored, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

type Index = HashMap<String, Arc<dyn ContentHandler>>;

pub struct HandlerContainer {
    config: ContainerConfig,
    factories: HashMap<String, Arc<dyn HandlerFactory>>,
    index: RwLock<Arc<Index>>,
}

impl HandlerContainer {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            config,
            factories: HashMap::new(),
            index: RwLock::new(Arc::new(Index::new())),
        }
    }

    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        factory: impl HandlerFactory + 'static,
    ) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(StewardError::FactoryAlreadyRegistered(name));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Scan the configured locations and replace the index.
    ///
    /// Bad descriptors are skipped, never fatal. A type id declared twice
    /// goes to the descriptor read last (locations in order, files in
    /// lexical order within a location).
    pub fn load(&self) -> LoadSummary {
        let mut summary = LoadSummary::default();
        let mut index = Index::new();

        for location in &self.config.locations {
            for path in descriptor_paths(location, &mut summary) {
                let descriptor = match HandlerDescriptor::from_path(&path) {
                    Ok(d) => d,
                    Err(err) => {
                        warn!(error = %err, "skipping handler descriptor");
                        summary.skipped.push((path, err.to_string()));
                        continue;
                    }
                };
                self.install_descriptor(&descriptor, &mut index, &mut summary);
            }
        }

        summary.loaded = index.keys().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        info!(
            types = ?summary.loaded,
            skipped = summary.skipped.len(),
            "handler container loaded"
        );
        self.swap(index);
        summary
    }

    fn install_descriptor(
        &self,
        descriptor: &HandlerDescriptor,
        index: &mut Index,
        summary: &mut LoadSummary,
    ) {
        let path = descriptor.path.clone();
        if !descriptor.enabled {
            debug!(path = %path.display(), "handler descriptor disabled");
            summary.skipped.push((path, "disabled".into()));
            return;
        }
        let Some(factory) = self.factories.get(&descriptor.handler) else {
            warn!(path = %path.display(), handler = %descriptor.handler, "no factory for handler");
            summary
                .skipped
                .push((path, format!("unknown handler '{}'", descriptor.handler)));
            return;
        };

        for type_id in &descriptor.types {
            match factory.create(type_id, descriptor) {
                Ok(handler) => {
                    if index.insert(type_id.clone(), handler).is_some() {
                        warn!(type_id = %type_id, path = %path.display(), "type id redeclared; later descriptor wins");
                    }
                }
                Err(err) => {
                    warn!(type_id = %type_id, error = %err, "handler factory failed");
                    summary
                        .skipped
                        .push((path.clone(), format!("{type_id}: {err}")));
                }
            }
        }
    }

    /// Handler for `type_id`, if one is loaded.
    pub fn find(&self, type_id: &str) -> Option<Arc<dyn ContentHandler>> {
        self.current().get(type_id).cloned()
    }

    /// Type ids in the current index, sorted.
    pub fn type_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.current().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn current(&self) -> Arc<Index> {
        match self.index.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, index: Index) {
        let index = Arc::new(index);
        match self.index.write() {
            Ok(mut guard) => *guard = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }
    }
}

/// `*.json` files directly under `dir`, in lexical order. A missing or
/// unreadable directory yields nothing.
fn descriptor_paths(dir: &Path, summary: &mut LoadSummary) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cannot read handler location");
            summary.skipped.push((dir.to_path_buf(), err.to_string()));
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentUnit, HandlerReport, Options};
    use async_trait::async_trait;
    use serde_json::json;

    struct Tagged(String);

    #[async_trait]
    impl ContentHandler for Tagged {
        async fn install(
            &self,
            _units: &[ContentUnit],
            _options: &Options,
        ) -> std::result::Result<HandlerReport, HandlerError> {
            Ok(HandlerReport::succeeded(0, json!(self.0)))
        }

        async fn update(
            &self,
            units: &[ContentUnit],
            options: &Options,
        ) -> std::result::Result<HandlerReport, HandlerError> {
            self.install(units, options).await
        }

        async fn uninstall(
            &self,
            units: &[ContentUnit],
            options: &Options,
        ) -> std::result::Result<HandlerReport, HandlerError> {
            self.install(units, options).await
        }

        async fn profile(&self) -> std::result::Result<HandlerReport, HandlerError> {
            Ok(HandlerReport::succeeded(0, json!(self.0)))
        }
    }

    fn tagged_factory(
        _type_id: &str,
        descriptor: &HandlerDescriptor,
    ) -> std::result::Result<Arc<dyn ContentHandler>, HandlerError> {
        let tag = descriptor.settings["tag"].as_str().unwrap_or("untagged");
        Ok(Arc::new(Tagged(tag.to_string())))
    }

    fn write(dir: &Path, name: &str, body: Value) {
        std::fs::write(dir.join(name), body.to_string()).unwrap();
    }

    fn container(dir: &Path) -> HandlerContainer {
        let mut container =
            HandlerContainer::new(ContainerConfig::default().with_location(dir));
        container.register_factory("tagged", tagged_factory).unwrap();
        container
    }

    async fn tag_of(container: &HandlerContainer, type_id: &str) -> Value {
        let handler = container.find(type_id).unwrap();
        handler.profile().await.unwrap().details
    }

    #[tokio::test]
    async fn loads_enabled_descriptors_and_finds_by_type() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "rpm.json", json!({ "handler": "tagged", "types": ["rpm", "srpm"], "settings": { "tag": "pkg" } }));
        write(dir.path(), "off.json", json!({ "enabled": false, "handler": "tagged", "types": ["puppet"] }));

        let container = container(dir.path());
        let summary = container.load();

        assert_eq!(summary.loaded, vec!["rpm".to_string(), "srpm".to_string()]);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(tag_of(&container, "srpm").await, json!("pkg"));
        assert!(container.find("puppet").is_none());
        assert!(container.find("xxx").is_none());
    }

    #[test]
    fn bad_descriptors_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ nope").unwrap();
        write(dir.path(), "unknown.json", json!({ "handler": "missing", "types": ["deb"] }));
        write(dir.path(), "blank.json", json!({ "handler": "tagged", "types": [""] }));
        write(dir.path(), "good.json", json!({ "handler": "tagged", "types": ["rpm"] }));
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let container = container(dir.path());
        let summary = container.load();

        assert_eq!(summary.loaded, vec!["rpm".to_string()]);
        assert_eq!(summary.skipped.len(), 3);
    }

    #[tokio::test]
    async fn later_descriptor_wins_for_duplicate_type() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", json!({ "handler": "tagged", "types": ["rpm"], "settings": { "tag": "first" } }));
        write(dir.path(), "b.json", json!({ "handler": "tagged", "types": ["rpm"], "settings": { "tag": "second" } }));

        let container = container(dir.path());
        container.load();
        assert_eq!(tag_of(&container, "rpm").await, json!("second"));
    }

    #[test]
    fn reload_replaces_the_index() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "rpm.json", json!({ "handler": "tagged", "types": ["rpm"] }));
        let container = container(dir.path());
        container.load();
        assert_eq!(container.type_ids(), vec!["rpm".to_string()]);

        std::fs::remove_file(dir.path().join("rpm.json")).unwrap();
        write(dir.path(), "deb.json", json!({ "handler": "tagged", "types": ["deb"] }));
        container.load();

        assert_eq!(container.type_ids(), vec!["deb".to_string()]);
        assert!(container.find("rpm").is_none());
    }

    #[test]
    fn missing_location_yields_empty_index() {
        let container = container(Path::new("/nonexistent/steward/handlers"));
        let summary = container.load();
        assert!(summary.loaded.is_empty());
        assert_eq!(summary.skipped.len(), 1);
    }

    #[test]
    fn duplicate_factory_name_is_rejected() {
        let mut container = HandlerContainer::new(ContainerConfig::default());
        container.register_factory("tagged", tagged_factory).unwrap();
        let err = container.register_factory("tagged", tagged_factory).unwrap_err();
        assert!(matches!(err, StewardError::FactoryAlreadyRegistered(name) if name == "tagged"));
    }
}
