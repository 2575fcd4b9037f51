//! Capability Registry
//!
//! The [`CapabilityRegistry`] merges the discovery results of every
//! configured backend into one [`Catalog`] and answers "which backend owns
//! tool X / resource URI Y".
//!
//! # Concurrency
//!
//! The live catalog is an `Arc<Catalog>` behind a lock that is only held
//! long enough to clone or replace the `Arc`. Rebuilds are serialized by a
//! separate writer lock and construct a complete new catalog before the
//! swap, so a reader sees either the fully old or the fully new capability
//! set of a backend, never a mixture.
//!
//! # Ordering
//!
//! Each backend's discovery results carry a sequence number. A result whose
//! sequence is not newer than the one already applied is ignored, so a slow
//! discovery finishing after a faster, later one cannot resurrect
//! capabilities the later one removed.
//!
//! # Collision policy
//!
//! Bare names resolve to the backend listed earliest in configuration order;
//! see [`Catalog`].

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use toolgate_domain::{
    CapabilitySet, Catalog, DomainError, PromptDescriptor, ResolvedResource, ToolDescriptor,
    UriTemplate,
};
use tracing::{debug, info, warn};

/// Result of applying a discovery result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The catalog was replaced; carries the new catalog version.
    Applied { version: u64 },
    /// A newer discovery result was already applied; nothing changed.
    Stale { current_seq: u64 },
}

struct BackendEntry {
    seq: u64,
    set: CapabilitySet,
}

#[derive(Default)]
struct WriterState {
    version: u64,
    entries: HashMap<String, BackendEntry>,
}

/// Runtime-mutable, atomically swapped capability namespace.
pub struct CapabilityRegistry {
    /// Enabled backends in configuration order (the collision tie-break).
    order: Vec<String>,
    current: RwLock<Arc<Catalog>>,
    writer: Mutex<WriterState>,
}

impl CapabilityRegistry {
    /// Create an empty registry for the given backends, in configuration order.
    pub fn new(order: Vec<String>) -> Self {
        Self {
            order,
            current: RwLock::new(Arc::new(Catalog::empty())),
            writer: Mutex::new(WriterState::default()),
        }
    }

    /// Backend names in configuration order.
    pub fn backends(&self) -> &[String] {
        &self.order
    }

    /// Replace `backend`'s capabilities unconditionally.
    pub fn rebuild(&self, backend: &str, set: CapabilitySet) -> Result<u64, DomainError> {
        self.ensure_known(backend)?;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let seq = writer.entries.get(backend).map(|e| e.seq).unwrap_or(0) + 1;
        Ok(self.apply(&mut writer, backend, seq, set))
    }

    /// Replace `backend`'s capabilities if `seq` is newer than the last
    /// applied discovery for that backend.
    pub fn rebuild_if_newer(
        &self,
        backend: &str,
        seq: u64,
        set: CapabilitySet,
    ) -> Result<RebuildOutcome, DomainError> {
        self.ensure_known(backend)?;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = writer.entries.get(backend)
            && existing.seq >= seq
        {
            debug!(
                backend = %backend,
                seq,
                current_seq = existing.seq,
                "Ignoring stale discovery result"
            );
            return Ok(RebuildOutcome::Stale {
                current_seq: existing.seq,
            });
        }

        let version = self.apply(&mut writer, backend, seq, set);
        Ok(RebuildOutcome::Applied { version })
    }

    /// Drop every capability of `backend`. Returns the new catalog version,
    /// or `None` when the backend had no entries.
    pub fn remove_backend(&self, backend: &str) -> Option<u64> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.entries.remove(backend)?;
        info!(backend = %backend, "Removed backend capabilities");
        Some(self.publish(&mut writer))
    }

    /// The live catalog. Cheap; never waits for a rebuild in progress.
    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version()
    }

    /// Resolve a qualified (`backend.tool`) or bare tool name.
    pub fn resolve(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.snapshot().resolve_tool(name)
    }

    /// Resolve a concrete URI to its owning resource and path parameters.
    pub fn resolve_resource(&self, uri: &str) -> Option<ResolvedResource> {
        self.snapshot().resolve_resource(uri)
    }

    pub fn resolve_prompt(&self, name: &str) -> Option<Arc<PromptDescriptor>> {
        self.snapshot().resolve_prompt(name)
    }

    fn ensure_known(&self, backend: &str) -> Result<(), DomainError> {
        if self.order.iter().any(|b| b == backend) {
            Ok(())
        } else {
            Err(DomainError::UnknownBackend(backend.to_string()))
        }
    }

    fn apply(&self, writer: &mut WriterState, backend: &str, seq: u64, set: CapabilitySet) -> u64 {
        let set = sanitize(backend, set);
        info!(
            backend = %backend,
            tools = set.tools.len(),
            resources = set.resources.len(),
            prompts = set.prompts.len(),
            "Registered backend capabilities"
        );
        writer
            .entries
            .insert(backend.to_string(), BackendEntry { seq, set });
        self.publish(writer)
    }

    /// Build a new catalog from the writer state and swap it in.
    fn publish(&self, writer: &mut WriterState) -> u64 {
        writer.version += 1;
        let version = writer.version;

        let ordered = self.order.iter().filter_map(|name| {
            writer
                .entries
                .get(name)
                .map(|entry| (name.as_str(), &entry.set))
        });
        let catalog = Catalog::build(version, ordered);

        for (name, owners) in catalog.collisions() {
            debug!(
                tool = %name,
                owner = %owners[0],
                shadowed = ?&owners[1..],
                "Tool name advertised by several backends, bare name resolves to earliest"
            );
        }

        let catalog = Arc::new(catalog);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = catalog;
        version
    }
}

/// Drop descriptors the catalog cannot index, keeping the rest of the set.
fn sanitize(backend: &str, mut set: CapabilitySet) -> CapabilitySet {
    let mut seen = HashSet::new();
    set.tools.retain(|tool| {
        if tool.name.trim().is_empty() {
            warn!(backend = %backend, "Skipping tool with empty name");
            return false;
        }
        if !seen.insert(tool.name.clone()) {
            warn!(backend = %backend, tool = %tool.name, "Skipping duplicate tool");
            return false;
        }
        true
    });

    set.resources.retain(|resource| match UriTemplate::parse(&resource.uri_template) {
        Ok(_) => true,
        Err(e) => {
            warn!(backend = %backend, error = %e, "Skipping resource");
            false
        }
    });

    let mut seen = HashSet::new();
    set.prompts.retain(|prompt| seen.insert(prompt.name.clone()));

    set.with_backend(backend)
}
