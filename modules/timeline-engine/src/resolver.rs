//! Module resolution: dependency graph → construction order → instances.
//!
//! Every check that can fail runs before the first module is built, so a
//! failed resolution never leaves a partially constructed run behind.

use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;
use timeline_events::{filter, kind, TimelineEvent};
use tracing::{debug, info};

use crate::deps::{Container, DependencyEntry};
use crate::error::ResolveError;
use crate::hooks::Runtime;
use crate::module::{DisplayMode, ModuleDescriptor};

/// Per-module metadata the analyser keeps for cascades and collection.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub handle: String,
    pub title: String,
    pub display_order: i32,
    pub display_mode: DisplayMode,
    pub dependencies: Vec<DependencyEntry>,
}

impl ModuleRecord {
    pub fn depends_on(&self, handle: &str) -> bool {
        self.dependencies.iter().any(|entry| entry.handle == handle)
    }
}

/// Output of a successful resolution.
pub struct ResolvedModules<E> {
    /// Construction order: every module after all of its dependencies.
    pub order: Vec<String>,
    pub records: IndexMap<String, ModuleRecord>,
    pub container: Container<E>,
}

pub struct ModuleResolver;

impl ModuleResolver {
    /// Validate, order and construct a module set.
    ///
    /// Each constructed module gets an init hook that runs its `initialise`
    /// when the run's init marker is dispatched.
    pub fn build<E: TimelineEvent>(
        descriptors: Vec<ModuleDescriptor<E>>,
        runtime: &Runtime<E>,
    ) -> Result<ResolvedModules<E>, ResolveError> {
        let mut planned: IndexMap<String, (ModuleDescriptor<E>, ModuleRecord)> = IndexMap::new();

        for descriptor in descriptors {
            let handle = descriptor.handle.to_owned();
            let dependencies = descriptor.dependencies.resolve(&handle)?;
            if planned.contains_key(&handle) {
                return Err(ResolveError::DuplicateHandle(handle));
            }
            let record = ModuleRecord {
                handle: handle.clone(),
                title: descriptor.title.to_owned(),
                display_order: descriptor.display_order,
                display_mode: descriptor.display_mode,
                dependencies,
            };
            planned.insert(handle, (descriptor, record));
        }

        for (handle, (_, record)) in &planned {
            for entry in &record.dependencies {
                if !planned.contains_key(&entry.handle) {
                    return Err(ResolveError::UnknownDependency {
                        module: handle.clone(),
                        dependency: entry.handle.clone(),
                    });
                }
            }
        }

        let order = construction_order(&planned)?;
        debug!(order = ?order, "Module construction order resolved");

        let mut container = Container::new();
        let mut records = IndexMap::with_capacity(order.len());

        for handle in &order {
            let Some((descriptor, record)) = planned.swap_remove(handle) else {
                continue;
            };

            let cell = (descriptor.construct)(&container, &record.dependencies, runtime);

            let lifecycle = Rc::downgrade(&cell.lifecycle);
            runtime.dispatcher.add_event_hook(
                handle,
                filter::<E>().kind(kind::INIT),
                move |_: &E| match lifecycle.upgrade() {
                    Some(lifecycle) => lifecycle.initialise(),
                    None => Ok(()),
                },
            );

            container.insert(handle, cell);
            records.insert(handle.clone(), record);
        }

        info!(modules = order.len(), "Modules constructed");

        Ok(ResolvedModules {
            order,
            records,
            container,
        })
    }
}

/// Kahn's algorithm over `module → dependency` edges, emitting dependencies
/// first. Ties keep declaration order so results are deterministic.
fn construction_order<E>(
    planned: &IndexMap<String, (ModuleDescriptor<E>, ModuleRecord)>,
) -> Result<Vec<String>, ResolveError> {
    // Unresolved dependency count per module, and the reverse edges.
    let mut pending: IndexMap<&str, usize> = IndexMap::with_capacity(planned.len());
    let mut dependents: IndexMap<&str, Vec<&str>> = IndexMap::new();

    for (handle, (_, record)) in planned {
        let mut seen: Vec<&str> = Vec::new();
        for entry in &record.dependencies {
            let dependency = entry.handle.as_str();
            if seen.contains(&dependency) {
                continue;
            }
            seen.push(dependency);
            dependents.entry(dependency).or_default().push(handle.as_str());
        }
        pending.insert(handle.as_str(), seen.len());
    }

    let mut ready: VecDeque<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(handle, _)| *handle)
        .collect();
    let mut order = Vec::with_capacity(planned.len());

    while let Some(handle) = ready.pop_front() {
        order.push(handle.to_owned());
        let Some(waiting) = dependents.get(handle) else {
            continue;
        };
        for dependent in waiting {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(*dependent);
                }
            }
        }
    }

    if order.len() != planned.len() {
        let involved = pending
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(handle, _)| (*handle).to_owned())
            .collect();
        return Err(ResolveError::Cycle { involved });
    }

    Ok(order)
}
