//! Typed errors for module resolution and analysis runs.

use thiserror::Error;

use crate::analyser::Phase;

/// Failures while turning a module set into a constructed, ordered run.
/// Always fatal for the whole run.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Two modules in one run share a handle
    #[error("duplicate module handle: {0}")]
    DuplicateHandle(String),

    /// A declared dependency names a module outside the run's module set
    #[error("module `{module}` depends on unknown module `{dependency}`")]
    UnknownDependency { module: String, dependency: String },

    /// Dependency graph is not acyclic
    #[error("dependency cycle between modules: {}", .involved.join(", "))]
    Cycle { involved: Vec<String> },

    /// Dependency metadata is malformed (empty handle or field)
    #[error("module `{module}` declares an invalid dependency: {reason}")]
    InvalidDependency { module: String, reason: String },

    /// A module source failed to produce its descriptors
    #[error("failed to load module group")]
    Load(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Why a module stopped participating in a run.
#[derive(Debug, Error)]
pub enum ModuleFault {
    /// The module's own hook or lifecycle callback returned an error
    #[error(transparent)]
    Raised(#[from] anyhow::Error),

    /// A module this one depends on was disabled
    #[error("dependency `{dependency}` failed")]
    DependencyFailed { dependency: String },

    /// `output()` returned an error during collection
    #[error("output failed: {0:#}")]
    Output(anyhow::Error),
}

/// Errors surfaced to the caller of an analysis run.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Resolution failed outside development mode. Details are logged, not returned.
    #[error("modules not found")]
    ModulesNotFound,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("event stream is empty")]
    EmptyEventStream,

    #[error("cannot {operation} while {phase:?}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },

    /// Development mode only: an isolated module error allowed to propagate
    #[error("module `{handle}` failed")]
    Module {
        handle: String,
        #[source]
        source: anyhow::Error,
    },
}
