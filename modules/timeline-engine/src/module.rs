//! Analysis module contract.
//!
//! Modules are plain structs. `ModuleInfo` carries the static metadata read
//! before construction; `Module` is the lifecycle the engine drives:
//! `build` once at resolution, `initialise` during the synthetic init event,
//! hook callbacks while events are dispatched, and `output` once afterwards.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use timeline_events::{ActorId, TimelineEvent};

use crate::deps::{construct, Construct, Container, Dependencies, DependencyEntry, ModuleCell};
use crate::hooks::{Hooks, Runtime};

/// Shared handle to a constructed module. Identity is `Rc::ptr_eq`.
pub type Dep<T> = Rc<RefCell<T>>;

/// Presentation hint for a module's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Collapsible,
    Full,
    Raw,
}

/// Well-known display orders. Lower sorts first.
pub mod display_order {
    pub const TOP: i32 = 0;
    pub const DEFAULT: i32 = 50;
    pub const BOTTOM: i32 = 100;
}

/// Static module metadata.
pub trait ModuleInfo {
    /// Unique identity within a run. Also the default dependency name.
    const HANDLE: &'static str;

    /// Display name. Falls back to the handle.
    const TITLE: Option<&'static str> = None;

    const DISPLAY_ORDER: i32 = display_order::DEFAULT;

    const DISPLAY_MODE: DisplayMode = DisplayMode::Collapsible;

    /// Declared dependencies. To extend another module's list, start from
    /// `Dependencies::inherit(&Other::dependencies())`.
    fn dependencies() -> Dependencies {
        Dependencies::new()
    }
}

/// Lifecycle of an analysis module over events of type `E`.
pub trait Module<E: TimelineEvent>: ModuleInfo + Sized + 'static {
    /// Construct the module. Dependencies are already built and available
    /// through `ctx`.
    fn build(ctx: &Construct<'_, Self, E>) -> Self;

    /// Called once as part of the init event. Register hooks here.
    fn initialise(&mut self, _hooks: &Hooks<Self, E>) -> Result<()> {
        Ok(())
    }

    /// Result payload, or `None` to suppress this module's result.
    fn output(&mut self) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

/// Read-only metadata about what is being analysed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Report code the log was read from
    pub report: String,
    /// Pull (fight) within the report
    pub pull: u32,
    /// Actor the analysis is focused on, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorId>,
}

// ---------------------------------------------------------------------------
// Descriptors & sources
// ---------------------------------------------------------------------------

/// Type-erased constructor for one module type.
pub(crate) type ConstructFn<E> =
    fn(&Container<E>, &[DependencyEntry], &Runtime<E>) -> ModuleCell<E>;

/// Everything the resolver needs to know about a module type.
pub struct ModuleDescriptor<E> {
    pub(crate) handle: &'static str,
    pub(crate) title: &'static str,
    pub(crate) display_order: i32,
    pub(crate) display_mode: DisplayMode,
    pub(crate) dependencies: Dependencies,
    pub(crate) construct: ConstructFn<E>,
}

impl<E: TimelineEvent> ModuleDescriptor<E> {
    pub fn of<M: Module<E>>() -> Self {
        Self {
            handle: M::HANDLE,
            title: M::TITLE.unwrap_or(M::HANDLE),
            display_order: M::DISPLAY_ORDER,
            display_mode: M::DISPLAY_MODE,
            dependencies: M::dependencies(),
            construct: construct::<M, E>,
        }
    }

    pub fn handle(&self) -> &'static str {
        self.handle
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }
}

impl<E> Clone for ModuleDescriptor<E> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            title: self.title,
            display_order: self.display_order,
            display_mode: self.display_mode,
            dependencies: self.dependencies.clone(),
            construct: self.construct,
        }
    }
}

impl<E> std::fmt::Debug for ModuleDescriptor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("handle", &self.handle)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A group of modules that may need to be loaded before a run.
///
/// All sources for a run are awaited together; this is the only point at
/// which an analysis run suspends.
#[async_trait(?Send)]
pub trait ModuleSource<E: TimelineEvent> {
    async fn load(&self) -> Result<Vec<ModuleDescriptor<E>>>;
}

/// A module group that is already in memory.
pub struct StaticModules<E>(pub Vec<ModuleDescriptor<E>>);

#[async_trait(?Send)]
impl<E: TimelineEvent> ModuleSource<E> for StaticModules<E> {
    async fn load(&self) -> Result<Vec<ModuleDescriptor<E>>> {
        Ok(self.0.clone())
    }
}
