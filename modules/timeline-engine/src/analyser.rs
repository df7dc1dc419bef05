//! One analysis run: resolve modules, drive the event stream through the
//! dispatcher, isolate failures, collect results.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::try_join_all;
use indexmap::IndexMap;
use serde::Serialize;
use timeline_events::{TimelineEvent, Timestamp};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AnalyserConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{AnalysisError, ModuleFault, ResolveError};
use crate::hooks::Runtime;
use crate::module::{Dep, ModuleSource, RunContext};
use crate::resolver::{ModuleResolver, ResolvedModules};
use crate::results::{Markup, ModuleErrorSummary, ModuleResult, Report};

/// Run lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Resolving,
    Dispatching,
    Collecting,
    Done,
}

/// One dispatch call as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedDispatch {
    pub kind: String,
    pub timestamp: Timestamp,
    pub active: Vec<String>,
}

pub type CaptureSink = Rc<RefCell<Vec<CapturedDispatch>>>;

pub struct Analyser<E: TimelineEvent> {
    config: AnalyserConfig,
    run_id: Uuid,
    phase: Phase,
    runtime: Runtime<E>,
    modules: Option<ResolvedModules<E>>,
    /// Module order minus every disabled module. Keeps topological order.
    active: Vec<String>,
    errors: IndexMap<String, ModuleFault>,
    capture: Option<CaptureSink>,
}

impl<E: TimelineEvent> Analyser<E> {
    pub fn new(config: AnalyserConfig, context: RunContext) -> Self {
        Self {
            config,
            run_id: Uuid::new_v4(),
            phase: Phase::Idle,
            runtime: Runtime::new(context),
            modules: None,
            active: Vec::new(),
            errors: IndexMap::new(),
            capture: None,
        }
    }

    /// Record every dispatched item and the active list it was sent to.
    pub fn with_capture(mut self, sink: CaptureSink) -> Self {
        self.capture = Some(sink);
        self
    }

    // -----------------------------------------------------------------------
    // Resolving
    // -----------------------------------------------------------------------

    /// Load every module group, then resolve and construct the module set.
    ///
    /// Outside development mode any resolution failure is reported as
    /// `ModulesNotFound`; the detailed error only goes to the log.
    pub async fn load_modules(
        &mut self,
        sources: &[Box<dyn ModuleSource<E>>],
    ) -> Result<(), AnalysisError> {
        self.expect_phase(Phase::Idle, "load modules")?;
        self.phase = Phase::Resolving;
        info!(run_id = %self.run_id, sources = sources.len(), "Resolving modules");

        let resolved = match self.resolve(sources).await {
            Ok(resolved) => resolved,
            Err(error) if self.config.development => return Err(error.into()),
            Err(error) => {
                warn!(run_id = %self.run_id, error = %error, "Module resolution failed");
                return Err(AnalysisError::ModulesNotFound);
            }
        };

        self.active = resolved.order.clone();
        self.modules = Some(resolved);
        self.phase = Phase::Dispatching;
        Ok(())
    }

    async fn resolve(
        &self,
        sources: &[Box<dyn ModuleSource<E>>],
    ) -> Result<ResolvedModules<E>, ResolveError> {
        let groups = try_join_all(sources.iter().map(|source| source.load()))
            .await
            .map_err(|e| ResolveError::Load(e.into()))?;

        let descriptors = groups.into_iter().flatten().collect();
        ModuleResolver::build(descriptors, &self.runtime)
    }

    // -----------------------------------------------------------------------
    // Dispatching
    // -----------------------------------------------------------------------

    /// Drive the whole event stream: init marker, every real event followed
    /// by whatever was fabricated while handling it, complete marker.
    pub fn parse_events(&mut self, events: &[E]) -> Result<(), AnalysisError> {
        self.expect_phase(Phase::Dispatching, "parse events")?;

        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            self.phase = Phase::Done;
            return Err(AnalysisError::EmptyEventStream);
        };

        info!(
            run_id = %self.run_id,
            events = events.len(),
            modules = self.active.len(),
            "Dispatching events"
        );

        if let Err(error) = self.dispatch_stream(first.timestamp(), last.timestamp(), events) {
            self.phase = Phase::Done;
            return Err(error);
        }

        info!(
            run_id = %self.run_id,
            active = self.active.len(),
            disabled = self.errors.len(),
            "Event stream exhausted"
        );
        self.phase = Phase::Collecting;
        Ok(())
    }

    fn dispatch_stream(
        &mut self,
        first: Timestamp,
        last: Timestamp,
        events: &[E],
    ) -> Result<(), AnalysisError> {
        self.dispatch(&E::init(first))?;

        for event in events {
            self.dispatch(event)?;
            // One drain per real event. Anything fabricated while these are
            // dispatched waits for the next real event.
            for fabricated in self.runtime.drain_fabricated() {
                self.dispatch(&fabricated)?;
            }
        }

        self.dispatch(&E::complete(last))?;

        let dropped = self.runtime.drain_fabricated();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Dropping events fabricated after the last real event");
        }
        Ok(())
    }

    fn dispatch(&mut self, item: &E) -> Result<(), AnalysisError> {
        if let Some(sink) = &self.capture {
            sink.borrow_mut().push(CapturedDispatch {
                kind: item.kind().to_owned(),
                timestamp: item.timestamp(),
                active: self.active.clone(),
            });
        }

        let issues = self.runtime.dispatcher.dispatch(item, &self.active);
        for issue in issues {
            if self.config.development {
                return Err(AnalysisError::Module {
                    handle: issue.handle,
                    source: issue.error,
                });
            }
            warn!(
                handle = issue.handle.as_str(),
                kind = item.kind(),
                timestamp = item.timestamp(),
                error = %format!("{:#}", issue.error),
                "Module failed, disabling"
            );
            self.set_module_error(&issue.handle, ModuleFault::Raised(issue.error));
        }
        Ok(())
    }

    /// Disable `handle` and, recursively, every still-active module that
    /// depends on it. A module already disabled keeps its first fault.
    fn set_module_error(&mut self, handle: &str, fault: ModuleFault) {
        let Some(position) = self.active.iter().position(|h| h == handle) else {
            return;
        };
        self.active.remove(position);
        self.errors.entry(handle.to_owned()).or_insert(fault);

        let dependents: Vec<String> = match &self.modules {
            Some(modules) => self
                .active
                .iter()
                .filter(|h| modules.records.get(*h).is_some_and(|r| r.depends_on(handle)))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        for dependent in dependents {
            warn!(
                handle = dependent.as_str(),
                dependency = handle,
                "Disabling module after dependency failure"
            );
            self.set_module_error(
                &dependent,
                ModuleFault::DependencyFailed {
                    dependency: handle.to_owned(),
                },
            );
        }
    }

    // -----------------------------------------------------------------------
    // Collecting
    // -----------------------------------------------------------------------

    /// Collect outputs in display order. Ties keep module order.
    pub fn generate_results(&mut self) -> Result<Vec<ModuleResult>, AnalysisError> {
        self.expect_phase(Phase::Collecting, "generate results")?;

        let Some(modules) = self.modules.as_ref() else {
            self.phase = Phase::Done;
            return Ok(Vec::new());
        };

        let mut records: Vec<_> = modules
            .order
            .iter()
            .filter_map(|handle| modules.records.get(handle))
            .collect();
        records.sort_by_key(|record| record.display_order);

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let disabled = self.errors.get(&record.handle).map(Markup::error);
            let markup = match disabled {
                Some(markup) => markup,
                None => {
                    let Some(cell) = modules.container.cell(&record.handle) else {
                        continue;
                    };
                    match cell.lifecycle.output() {
                        Ok(None) => continue,
                        Ok(Some(content)) => Markup::content(content),
                        Err(error) if self.config.development => {
                            self.phase = Phase::Done;
                            return Err(AnalysisError::Module {
                                handle: record.handle.clone(),
                                source: error,
                            });
                        }
                        Err(error) => {
                            warn!(
                                handle = record.handle.as_str(),
                                error = %format!("{error:#}"),
                                "Module output failed"
                            );
                            let fault = ModuleFault::Output(error);
                            let markup = Markup::error(&fault);
                            self.errors.insert(record.handle.clone(), fault);
                            markup
                        }
                    }
                }
            };

            results.push(ModuleResult {
                handle: record.handle.clone(),
                name: record.title.clone(),
                mode: record.display_mode,
                markup,
            });
        }

        self.phase = Phase::Done;
        info!(run_id = %self.run_id, results = results.len(), "Results collected");
        Ok(results)
    }

    /// Load, dispatch and collect in one go.
    pub async fn run(
        mut self,
        sources: &[Box<dyn ModuleSource<E>>],
        events: &[E],
    ) -> Result<Report, AnalysisError> {
        self.load_modules(sources).await?;
        self.parse_events(events)?;
        let results = self.generate_results()?;
        Ok(self.report(results))
    }

    /// Package collected results with the run's identity and error summary.
    pub fn report(&self, results: Vec<ModuleResult>) -> Report {
        Report {
            run_id: self.run_id,
            context: self.runtime.context().clone(),
            results,
            errors: self
                .errors
                .iter()
                .map(|(handle, fault)| ModuleErrorSummary {
                    handle: handle.clone(),
                    message: format!("{fault:#}"),
                })
                .collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        self.runtime.context()
    }

    pub fn dispatcher(&self) -> &Dispatcher<E> {
        self.runtime.dispatcher()
    }

    /// Modules still receiving events.
    pub fn active_modules(&self) -> &[String] {
        &self.active
    }

    /// Construction order. Empty until modules are resolved.
    pub fn module_order(&self) -> &[String] {
        self.modules
            .as_ref()
            .map(|m| m.order.as_slice())
            .unwrap_or_default()
    }

    /// Disabled modules in the order they were disabled.
    pub fn module_errors(&self) -> &IndexMap<String, ModuleFault> {
        &self.errors
    }

    /// A constructed module by handle and type.
    pub fn module<T: 'static>(&self, handle: &str) -> Option<Dep<T>> {
        self.modules.as_ref()?.container.get::<T>(handle)
    }

    fn expect_phase(&self, expected: Phase, operation: &'static str) -> Result<(), AnalysisError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(AnalysisError::InvalidPhase {
                operation,
                phase: self.phase,
            })
        }
    }
}
