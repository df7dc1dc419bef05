//! Dependency declarations and the construction container.
//!
//! A module declares what it depends on with `Dependencies`, a plain value
//! returned from `ModuleInfo::dependencies`. Extending another module's
//! declarations produces a new value; nothing shared is mutated.
//!
//! At construction time the container holds every module built so far,
//! keyed by handle. A new module asks for its dependencies by field name
//! through `Construct::dependency`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use anyhow::{anyhow, Result};
use serde::Serialize;
use timeline_events::TimelineEvent;

use crate::error::ResolveError;
use crate::hooks::{Hooks, Runtime};
use crate::module::{Dep, Module, ModuleInfo, RunContext};

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// Field and handle are the same name.
    Named(String),
    /// Bind the module `handle` to a differently named field.
    Aliased { handle: String, field: String },
    /// Bind a concrete module type; the handle comes from the type.
    Typed { handle: &'static str, field: String },
}

impl Dependency {
    pub fn named(handle: impl Into<String>) -> Self {
        Dependency::Named(handle.into())
    }

    pub fn aliased(handle: impl Into<String>, field: impl Into<String>) -> Self {
        Dependency::Aliased {
            handle: handle.into(),
            field: field.into(),
        }
    }

    pub fn on<T: ModuleInfo>(field: impl Into<String>) -> Self {
        Dependency::Typed {
            handle: T::HANDLE,
            field: field.into(),
        }
    }

    fn entry(&self) -> DependencyEntry {
        match self {
            Dependency::Named(handle) => DependencyEntry {
                field: handle.clone(),
                handle: handle.clone(),
            },
            Dependency::Aliased { handle, field } => DependencyEntry {
                field: field.clone(),
                handle: handle.clone(),
            },
            Dependency::Typed { handle, field } => DependencyEntry {
                field: field.clone(),
                handle: (*handle).to_owned(),
            },
        }
    }
}

/// A module's full list of declared dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    declared: Vec<Dependency>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from another module's declarations. The parent's value is
    /// copied, so extending the result never changes what the parent reports.
    pub fn inherit(parent: &Dependencies) -> Self {
        parent.clone()
    }

    pub fn with(mut self, dependency: Dependency) -> Self {
        self.declared.push(dependency);
        self
    }

    pub fn named(self, handle: impl Into<String>) -> Self {
        self.with(Dependency::named(handle))
    }

    pub fn aliased(self, handle: impl Into<String>, field: impl Into<String>) -> Self {
        self.with(Dependency::aliased(handle, field))
    }

    pub fn on<T: ModuleInfo>(self, field: impl Into<String>) -> Self {
        self.with(Dependency::on::<T>(field))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.declared.iter()
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Resolve declarations to `(field, handle)` entries for module `owner`.
    ///
    /// A later declaration of the same field replaces an earlier one in place.
    pub fn resolve(&self, owner: &str) -> Result<Vec<DependencyEntry>, ResolveError> {
        let mut entries: Vec<DependencyEntry> = Vec::with_capacity(self.declared.len());

        for dependency in &self.declared {
            let entry = dependency.entry();
            if entry.handle.is_empty() || entry.field.is_empty() {
                return Err(ResolveError::InvalidDependency {
                    module: owner.to_owned(),
                    reason: format!("empty handle or field in {dependency:?}"),
                });
            }

            match entries.iter_mut().find(|e| e.field == entry.field) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        }

        Ok(entries)
    }
}

/// A resolved dependency: the field it binds to and the handle it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEntry {
    pub field: String,
    pub handle: String,
}

/// Resolve the dependency entries of a module type.
pub fn resolve<M: ModuleInfo>() -> Result<Vec<DependencyEntry>, ResolveError> {
    M::dependencies().resolve(M::HANDLE)
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Lifecycle calls the engine makes on an erased module.
pub(crate) trait Lifecycle {
    fn initialise(&self) -> Result<()>;
    fn output(&self) -> Result<Option<serde_json::Value>>;
}

struct Slot<M, E> {
    module: Dep<M>,
    hooks: Hooks<M, E>,
}

impl<M: Module<E>, E: TimelineEvent> Lifecycle for Slot<M, E> {
    fn initialise(&self) -> Result<()> {
        let mut module = self
            .module
            .try_borrow_mut()
            .map_err(|_| anyhow!("module `{}` is already borrowed", M::HANDLE))?;
        module.initialise(&self.hooks)
    }

    fn output(&self) -> Result<Option<serde_json::Value>> {
        let mut module = self
            .module
            .try_borrow_mut()
            .map_err(|_| anyhow!("module `{}` is already borrowed", M::HANDLE))?;
        module.output()
    }
}

/// One constructed module, held both as `Any` (for typed lookup) and as
/// its erased lifecycle. Both point at the same allocation.
pub(crate) struct ModuleCell<E> {
    instance: Rc<dyn Any>,
    pub(crate) lifecycle: Rc<dyn Lifecycle>,
    _event: std::marker::PhantomData<fn(&E)>,
}

/// Flat handle → instance map, filled in dependency order. Entries are
/// never replaced or removed once inserted.
pub struct Container<E> {
    modules: HashMap<String, ModuleCell<E>>,
}

impl<E: TimelineEvent> Default for Container<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TimelineEvent> Container<E> {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.modules.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Typed lookup. `None` if absent or of a different type.
    pub fn get<T: 'static>(&self, handle: &str) -> Option<Dep<T>> {
        let cell = self.modules.get(handle)?;
        Rc::clone(&cell.instance).downcast::<RefCell<T>>().ok()
    }

    pub(crate) fn cell(&self, handle: &str) -> Option<&ModuleCell<E>> {
        self.modules.get(handle)
    }

    pub(crate) fn insert(&mut self, handle: &str, cell: ModuleCell<E>) {
        self.modules.entry(handle.to_owned()).or_insert(cell);
    }
}

/// What a module sees while it is being built.
pub struct Construct<'a, M, E> {
    entries: &'a [DependencyEntry],
    container: &'a Container<E>,
    hooks: Hooks<M, E>,
    context: &'a RunContext,
}

impl<'a, M: 'static, E: TimelineEvent> Construct<'a, M, E> {
    /// The instance bound to a declared dependency field. `None` when the
    /// field was not declared or the instance is missing; using it is then
    /// the module's own (isolated) failure.
    pub fn dependency<T: 'static>(&self, field: &str) -> Option<Dep<T>> {
        let entry = self.entries.iter().find(|e| e.field == field)?;
        self.container.get::<T>(&entry.handle)
    }

    /// Like `dependency`, but as an error for use with `?` in hook callbacks.
    pub fn require<T: 'static>(&self, field: &str) -> Result<Dep<T>> {
        self.dependency(field)
            .ok_or_else(|| anyhow!("dependency `{field}` is not available"))
    }

    /// Registration handle for this module. Clone and keep it to register
    /// hooks after `initialise`.
    pub fn hooks(&self) -> Hooks<M, E> {
        self.hooks.clone()
    }

    pub fn context(&self) -> &RunContext {
        self.context
    }

    pub fn entries(&self) -> &[DependencyEntry] {
        self.entries
    }
}

/// Build `M` against the container and wrap it for the engine.
pub(crate) fn construct<M: Module<E>, E: TimelineEvent>(
    container: &Container<E>,
    entries: &[DependencyEntry],
    runtime: &Runtime<E>,
) -> ModuleCell<E> {
    let module: Dep<M> = Rc::new_cyclic(|weak: &Weak<RefCell<M>>| {
        let ctx = Construct {
            entries,
            container,
            hooks: Hooks::new(M::HANDLE, weak.clone(), runtime),
            context: &runtime.context,
        };
        RefCell::new(M::build(&ctx))
    });

    let slot = Slot {
        hooks: Hooks::new(M::HANDLE, Rc::downgrade(&module), runtime),
        module: Rc::clone(&module),
    };

    ModuleCell {
        instance: module,
        lifecycle: Rc::new(slot),
        _event: std::marker::PhantomData,
    }
}
