// crates/flowruntime/src/loader.rs

use crate::registry::NodeRegistry;
use async_trait::async_trait;
use flowcore::{GraphTemplate, TemplateError, TemplateRef};
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Where templates come from when they are not in the subsystem's cache.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    fn load_blocking(&self, path: &TemplateRef) -> Result<GraphTemplate, TemplateError>;

    async fn load(&self, path: &TemplateRef) -> Result<GraphTemplate, TemplateError> {
        self.load_blocking(path)
    }
}

/// Templates held in memory, keyed by path.
#[derive(Default)]
pub struct MemoryTemplateSource {
    templates: HashMap<TemplateRef, GraphTemplate>,
}

impl MemoryTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template: GraphTemplate) {
        self.templates.insert(template.path.clone(), template);
    }

    pub fn with_template(mut self, template: GraphTemplate) -> Self {
        self.insert(template);
        self
    }
}

#[async_trait]
impl TemplateSource for MemoryTemplateSource {
    fn load_blocking(&self, path: &TemplateRef) -> Result<GraphTemplate, TemplateError> {
        self.templates
            .get(path)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(path.to_string()))
    }
}

/// Templates stored as `<root>/<path>.json`.
pub struct JsonDirectorySource {
    root: PathBuf,
}

impl JsonDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, path: &TemplateRef) -> PathBuf {
        self.root.join(format!("{}.json", path.as_str()))
    }

    fn parse(path: &TemplateRef, json: &str) -> Result<GraphTemplate, TemplateError> {
        let mut template = GraphTemplate::from_json(json)
            .map_err(|e| TemplateError::Invalid(format!("{}: {}", path, e)))?;
        template.path = path.clone();
        Ok(template)
    }
}

#[async_trait]
impl TemplateSource for JsonDirectorySource {
    fn load_blocking(&self, path: &TemplateRef) -> Result<GraphTemplate, TemplateError> {
        let file = self.file_for(path);
        let json = std::fs::read_to_string(&file)
            .map_err(|e| TemplateError::NotFound(format!("{} ({})", file.display(), e)))?;
        Self::parse(path, &json)
    }

    async fn load(&self, path: &TemplateRef) -> Result<GraphTemplate, TemplateError> {
        let file = self.file_for(path);
        let json = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| TemplateError::NotFound(format!("{} ({})", file.display(), e)))?;
        Self::parse(path, &json)
    }
}

/// Load `root` and every template its sub-graph nodes reference, one level at a time.
///
/// Templates listed in `skip` are treated as already available and not loaded again.
pub async fn load_template_tree(
    source: &dyn TemplateSource,
    registry: &NodeRegistry,
    root: &TemplateRef,
    skip: &HashSet<TemplateRef>,
) -> Result<Vec<GraphTemplate>, TemplateError> {
    let mut seen: HashSet<TemplateRef> = skip.clone();
    let mut pending = Vec::new();
    let mut loaded = Vec::new();

    if seen.insert(root.clone()) {
        pending.push(root.clone());
    }

    while !pending.is_empty() {
        let batch = try_join_all(pending.iter().map(|path| source.load(path))).await?;
        pending.clear();

        for template in batch {
            for node in template.nodes() {
                for asset in registry.referenced_assets(node) {
                    if !asset.is_empty() && seen.insert(asset.clone()) {
                        pending.push(asset);
                    }
                }
            }
            tracing::debug!("Loaded template {}", template.path);
            loaded.push(template);
        }
    }

    Ok(loaded)
}
