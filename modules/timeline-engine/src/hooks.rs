//! Per-module registration handle.
//!
//! `Hooks<M, E>` binds the run's dispatcher to one module: callbacks are
//! written against `&mut M`, and every hook is registered under the
//! module's handle so errors and removals are attributed to it.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use anyhow::{anyhow, Result};
use timeline_events::{Predicate, TimelineEvent, Timestamp};

use crate::dispatcher::{Dispatcher, EventHookId, TimestampHookId};
use crate::module::RunContext;

/// Plumbing shared by every module in one run.
pub struct Runtime<E> {
    pub(crate) dispatcher: Rc<Dispatcher<E>>,
    pub(crate) fabricated: Rc<RefCell<Vec<E>>>,
    pub(crate) context: Rc<RunContext>,
}

impl<E: TimelineEvent> Runtime<E> {
    pub fn new(context: RunContext) -> Self {
        Self {
            dispatcher: Rc::new(Dispatcher::new()),
            fabricated: Rc::new(RefCell::new(Vec::new())),
            context: Rc::new(context),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<E> {
        &self.dispatcher
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Take every event fabricated since the last drain.
    pub(crate) fn drain_fabricated(&self) -> Vec<E> {
        std::mem::take(&mut *self.fabricated.borrow_mut())
    }
}

pub struct Hooks<M, E> {
    handle: &'static str,
    module: Weak<RefCell<M>>,
    dispatcher: Rc<Dispatcher<E>>,
    fabricated: Rc<RefCell<Vec<E>>>,
}

impl<M, E> Clone for Hooks<M, E> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            module: self.module.clone(),
            dispatcher: Rc::clone(&self.dispatcher),
            fabricated: Rc::clone(&self.fabricated),
        }
    }
}

impl<M: 'static, E: TimelineEvent> Hooks<M, E> {
    pub(crate) fn new(
        handle: &'static str,
        module: Weak<RefCell<M>>,
        runtime: &Runtime<E>,
    ) -> Self {
        Self {
            handle,
            module,
            dispatcher: Rc::clone(&runtime.dispatcher),
            fabricated: Rc::clone(&runtime.fabricated),
        }
    }

    pub fn handle(&self) -> &'static str {
        self.handle
    }

    /// The dispatcher's virtual clock.
    pub fn timestamp(&self) -> Timestamp {
        self.dispatcher.timestamp()
    }

    pub fn add_event_hook<P, F>(&self, predicate: P, callback: F) -> EventHookId
    where
        P: Predicate<E>,
        F: Fn(&mut M, &P::Output) -> Result<()> + 'static,
    {
        let module = self.module.clone();
        let handle = self.handle;
        self.dispatcher.add_event_hook(self.handle, predicate, move |event| {
            with_module(&module, handle, |m| callback(m, event))
        })
    }

    pub fn remove_event_hook(&self, id: EventHookId) -> bool {
        self.dispatcher.remove_event_hook(self.handle, id)
    }

    /// Schedule `callback` for `timestamp` on the virtual clock. Silently
    /// dropped if that moment has already passed.
    pub fn add_timestamp_hook<F>(&self, timestamp: Timestamp, callback: F) -> TimestampHookId
    where
        F: Fn(&mut M, Timestamp) -> Result<()> + 'static,
    {
        let module = self.module.clone();
        let handle = self.handle;
        self.dispatcher.add_timestamp_hook(self.handle, timestamp, move |at| {
            with_module(&module, handle, |m| callback(m, at))
        })
    }

    pub fn remove_timestamp_hook(&self, id: TimestampHookId) -> bool {
        self.dispatcher.remove_timestamp_hook(self.handle, id)
    }

    /// Fabricate an event, delivered right after the real event currently
    /// being processed.
    pub fn queue_event(&self, event: E) {
        self.fabricated.borrow_mut().push(event);
    }
}

fn with_module<M, T>(
    module: &Weak<RefCell<M>>,
    handle: &str,
    f: impl FnOnce(&mut M) -> Result<T>,
) -> Result<T> {
    let module = module
        .upgrade()
        .ok_or_else(|| anyhow!("module `{handle}` is no longer alive"))?;
    let mut guard = module
        .try_borrow_mut()
        .map_err(|_| anyhow!("module `{handle}` is already borrowed"))?;
    f(&mut guard)
}
