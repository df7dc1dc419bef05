//! Module orchestration for timeline analysis.
//!
//! Resolves a set of analysis modules into a dependency-safe construction
//! order, replays an event stream through a hook dispatcher, and isolates
//! failing modules together with everything that depends on them.
//!
//! A run is single-threaded. The only await point is loading module groups
//! in `Analyser::load_modules`.

pub mod analyser;
pub mod config;
pub mod deps;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod module;
pub mod resolver;
pub mod results;

pub use analyser::{Analyser, CaptureSink, CapturedDispatch, Phase};
pub use config::AnalyserConfig;
pub use deps::{Construct, Container, Dependencies, Dependency, DependencyEntry};
pub use dispatcher::{DispatchIssue, Dispatcher, EventHookId, TimestampHookId};
pub use error::{AnalysisError, ModuleFault, ResolveError};
pub use hooks::{Hooks, Runtime};
pub use module::{
    display_order, Dep, DisplayMode, Module, ModuleDescriptor, ModuleInfo, ModuleSource,
    RunContext, StaticModules,
};
pub use resolver::{ModuleRecord, ModuleResolver, ResolvedModules};
pub use results::{Markup, ModuleErrorSummary, ModuleResult, Report, ERROR_PLACEHOLDER};
