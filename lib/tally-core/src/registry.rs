//! Named registries shared between reporters.

use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex, MutexGuard},
};

use arc_swap::ArcSwap;
use tracing::debug;

use crate::{
    reporter::Ingest,
    sample::{Labels, MetricCategory, Sample, SampleKind},
};

/// Key of the registry used when no name is configured.
pub const DEFAULT_REGISTRY_NAME: &str = "default";

/// A named namespace of instrumentation.
///
/// Every sample recorded through a registry is delivered to every reporter attached to it. Reporters configured with
/// the same registry name therefore share instrumentation, and reporters with different names are isolated from one
/// another.
pub struct Registry {
    name: String,
    reporters: ArcSwap<Vec<Arc<Ingest>>>,
}

impl Registry {
    fn new(name: String) -> Self {
        Self {
            name,
            reporters: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Returns the name of the registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of reporters attached to the registry.
    pub fn reporter_count(&self) -> usize {
        self.reporters.load().len()
    }

    /// Records a sample to every attached reporter.
    ///
    /// Never waits for buffer capacity.
    pub fn record<N>(&self, name: N, category: MetricCategory, labels: Labels, value: f64, kind: SampleKind)
    where
        N: Into<Arc<str>>,
    {
        self.record_sample(&Sample::new(name, category, labels, value, kind));
    }

    /// Records an existing sample to every attached reporter.
    pub fn record_sample(&self, sample: &Sample) {
        for reporter in self.reporters.load().iter() {
            reporter.record(sample);
        }
    }

    /// Records a sample to every attached reporter, honoring each reporter's overflow policy.
    pub async fn submit(&self, sample: &Sample) {
        let reporters = self.reporters.load_full();
        for reporter in reporters.iter() {
            reporter.submit(sample).await;
        }
    }

    pub(crate) fn attach(&self, ingest: Arc<Ingest>) {
        self.reporters.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&ingest));
            next
        });
    }

    pub(crate) fn detach(&self, ingest: &Arc<Ingest>) {
        self.reporters.rcu(|current| {
            current
                .iter()
                .filter(|existing| !Arc::ptr_eq(existing, ingest))
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("reporters", &self.reporter_count())
            .finish()
    }
}

/// A reference to a registry, counted by the coordinator that handed it out.
///
/// Must be given back with [`RegistryCoordinator::release`].
#[derive(Debug)]
#[must_use = "registry references must be released"]
pub struct RegistryHandle {
    registry: Arc<Registry>,
}

impl RegistryHandle {
    /// Returns the shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Deref for RegistryHandle {
    type Target = Registry;

    fn deref(&self) -> &Registry {
        &self.registry
    }
}

struct Entry {
    registry: Arc<Registry>,
    references: usize,
}

/// Table of named registries.
///
/// Registries are created on first reference and torn down when their last reference is released. The table lock is
/// only held for the lookup-or-insert, never for the lifetime of a registry.
///
/// Cloning the coordinator yields another handle to the same table.
#[derive(Clone, Default)]
pub struct RegistryCoordinator {
    registries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl RegistryCoordinator {
    /// Creates a new, empty `RegistryCoordinator`.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.registries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the registry with the given name, creating it if needed, and takes a reference to it.
    ///
    /// `None` refers to the default registry.
    pub fn get_or_create(&self, name: Option<&str>) -> RegistryHandle {
        let name = name.unwrap_or(DEFAULT_REGISTRY_NAME);

        let mut registries = self.lock();
        let entry = registries.entry(name.to_string()).or_insert_with(|| {
            debug!(registry = name, "Created registry.");
            Entry {
                registry: Arc::new(Registry::new(name.to_string())),
                references: 0,
            }
        });
        entry.references += 1;

        RegistryHandle {
            registry: Arc::clone(&entry.registry),
        }
    }

    /// Returns the registry with the given name, if it exists, without taking a reference to it.
    pub fn get(&self, name: Option<&str>) -> Option<Arc<Registry>> {
        let name = name.unwrap_or(DEFAULT_REGISTRY_NAME);
        self.lock().get(name).map(|entry| Arc::clone(&entry.registry))
    }

    /// Releases a reference to a registry, tearing it down if it was the last one.
    pub fn release(&self, handle: RegistryHandle) {
        let mut registries = self.lock();
        let name = handle.registry.name();

        let Some(entry) = registries.get_mut(name) else {
            return;
        };
        // A handle from a torn-down registry must not release its successor.
        if !Arc::ptr_eq(&entry.registry, &handle.registry) {
            return;
        }

        entry.references = entry.references.saturating_sub(1);
        if entry.references == 0 {
            registries.remove(name);
            debug!(registry = name, "Tore down registry.");
        }
    }

    /// Returns the number of live registries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if there are no live registries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RegistryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registries = self.lock();
        let mut names = registries.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("RegistryCoordinator").field("registries", &names).finish()
    }
}
