//! The merged capability catalog.
//!
//! A [`Catalog`] is an immutable snapshot built from every backend's latest
//! discovery result, in configuration order. It is never mutated after
//! construction; the registry swaps whole catalogs instead.
//!
//! # Collision policy
//!
//! Every tool is reachable by its qualified name (`backend.tool`). The bare
//! name resolves to the tool of the backend listed earliest in
//! configuration order. Later backends advertising the same bare name are
//! still reachable through their qualified names and are reported by
//! [`Catalog::collisions`]. Prompts follow the same rule.

use super::descriptor::{CapabilitySet, PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use super::qualified::{QUALIFIER_SEPARATOR, QualifiedName};
use super::uri_template::{UriTemplate, best_match};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A resource resolved from a concrete URI.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub descriptor: Arc<ResourceDescriptor>,
    pub params: HashMap<String, String>,
}

/// One tool as listed to the agent layer.
#[derive(Debug, Clone, Serialize)]
pub struct ToolListing {
    pub name: String,
    pub qualified_name: String,
    pub backend: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub long_running: bool,
    /// The bare name resolves to another backend's tool.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub shadowed: bool,
}

#[derive(Debug, Clone)]
struct ResourceEntry {
    template: UriTemplate,
    descriptor: Arc<ResourceDescriptor>,
}

/// Immutable, queryable view of all advertised capabilities.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    version: u64,
    backends: Vec<String>,
    tools: Vec<Arc<ToolDescriptor>>,
    tools_by_qualified: HashMap<String, Arc<ToolDescriptor>>,
    tools_by_name: HashMap<String, Arc<ToolDescriptor>>,
    resources: Vec<ResourceEntry>,
    prompts: Vec<Arc<PromptDescriptor>>,
    prompts_by_qualified: HashMap<String, Arc<PromptDescriptor>>,
    prompts_by_name: HashMap<String, Arc<PromptDescriptor>>,
    collisions: BTreeMap<String, Vec<String>>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a catalog from per-backend capability sets in configuration order.
    ///
    /// Resources whose URI template does not parse are left out.
    pub fn build<'a>(
        version: u64,
        entries: impl IntoIterator<Item = (&'a str, &'a CapabilitySet)>,
    ) -> Self {
        let mut catalog = Self {
            version,
            ..Self::default()
        };

        for (backend, set) in entries {
            catalog.backends.push(backend.to_string());

            for tool in &set.tools {
                let mut tool = tool.clone();
                tool.backend = backend.to_string();
                let tool = Arc::new(tool);
                let qualified = qualify(backend, &tool.name);
                if catalog.tools_by_qualified.contains_key(&qualified) {
                    continue;
                }
                catalog.tools_by_qualified.insert(qualified, Arc::clone(&tool));
                match catalog.tools_by_name.get(&tool.name) {
                    Some(owner) => {
                        let owners = catalog
                            .collisions
                            .entry(tool.name.clone())
                            .or_insert_with(|| vec![owner.backend.clone()]);
                        owners.push(backend.to_string());
                    }
                    None => {
                        catalog
                            .tools_by_name
                            .insert(tool.name.clone(), Arc::clone(&tool));
                    }
                }
                catalog.tools.push(tool);
            }

            for resource in &set.resources {
                let Ok(template) = UriTemplate::parse(&resource.uri_template) else {
                    continue;
                };
                let mut resource = resource.clone();
                resource.backend = backend.to_string();
                catalog.resources.push(ResourceEntry {
                    template,
                    descriptor: Arc::new(resource),
                });
            }

            for prompt in &set.prompts {
                let mut prompt = prompt.clone();
                prompt.backend = backend.to_string();
                let prompt = Arc::new(prompt);
                let qualified = qualify(backend, &prompt.name);
                if catalog.prompts_by_qualified.contains_key(&qualified) {
                    continue;
                }
                catalog
                    .prompts_by_qualified
                    .insert(qualified, Arc::clone(&prompt));
                catalog
                    .prompts_by_name
                    .entry(prompt.name.clone())
                    .or_insert_with(|| Arc::clone(&prompt));
                catalog.prompts.push(prompt);
            }
        }

        catalog
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Backends with entries in this catalog, in configuration order.
    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    /// Resolve a qualified or bare tool name.
    ///
    /// A name of the form `backend.tool` whose backend prefix is known is
    /// looked up as qualified first; anything else falls back to bare-name
    /// resolution.
    pub fn resolve_tool(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.tools_by_qualified
            .get(name)
            .or_else(|| self.tools_by_name.get(name))
            .cloned()
    }

    pub fn resolve_qualified(&self, name: &QualifiedName) -> Option<Arc<ToolDescriptor>> {
        self.tools_by_qualified.get(&name.to_string()).cloned()
    }

    /// Resolve a concrete URI to the most specific matching resource.
    pub fn resolve_resource(&self, uri: &str) -> Option<ResolvedResource> {
        best_match(
            self.resources
                .iter()
                .map(|entry| (&entry.template, &entry.descriptor)),
            uri,
        )
        .map(|(descriptor, params)| ResolvedResource {
            descriptor: Arc::clone(descriptor),
            params,
        })
    }

    pub fn resolve_prompt(&self, name: &str) -> Option<Arc<PromptDescriptor>> {
        self.prompts_by_qualified
            .get(name)
            .or_else(|| self.prompts_by_name.get(name))
            .cloned()
    }

    pub fn tools(&self) -> &[Arc<ToolDescriptor>] {
        &self.tools
    }

    pub fn resources(&self) -> impl Iterator<Item = &Arc<ResourceDescriptor>> {
        self.resources.iter().map(|entry| &entry.descriptor)
    }

    pub fn prompts(&self) -> &[Arc<PromptDescriptor>] {
        &self.prompts
    }

    /// Bare tool names advertised by more than one backend, with the
    /// backends in configuration order (the first one owns the bare name).
    pub fn collisions(&self) -> &BTreeMap<String, Vec<String>> {
        &self.collisions
    }

    pub fn tool_count(&self, backend: &str) -> usize {
        self.tools.iter().filter(|t| t.backend == backend).count()
    }

    pub fn resource_count(&self, backend: &str) -> usize {
        self.resources().filter(|r| r.backend == backend).count()
    }

    pub fn prompt_count(&self, backend: &str) -> usize {
        self.prompts.iter().filter(|p| p.backend == backend).count()
    }

    /// Flat listing of every tool for introspection.
    pub fn tool_listing(&self) -> Vec<ToolListing> {
        self.tools
            .iter()
            .map(|tool| {
                let shadowed = self
                    .tools_by_name
                    .get(&tool.name)
                    .is_some_and(|owner| owner.backend != tool.backend);
                ToolListing {
                    name: tool.name.clone(),
                    qualified_name: qualify(&tool.backend, &tool.name),
                    backend: tool.backend.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                    long_running: tool.long_running,
                    shadowed,
                }
            })
            .collect()
    }
}

fn qualify(backend: &str, name: &str) -> String {
    format!("{}{}{}", backend, QUALIFIER_SEPARATOR, name)
}
