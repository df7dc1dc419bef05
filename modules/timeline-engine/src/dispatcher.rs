//! Hook registries and the per-event dispatch step.
//!
//! Two registries live here:
//! - event hooks, grouped by owning handle and then by bucket key
//! - timestamp hooks, a one-shot queue kept sorted nearest-due-last
//!
//! `dispatch` never fails. Errors raised by callbacks come back as
//! `DispatchIssue`s for the caller to act on. Registries use interior
//! mutability so callbacks can add and remove hooks mid-dispatch; no
//! borrow is held while a callback runs.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Result;
use timeline_events::{Predicate, TimelineEvent, Timestamp};
use tracing::debug;

/// A module's hook or lifecycle callback raised during dispatch.
#[derive(Debug)]
pub struct DispatchIssue {
    pub handle: String,
    pub error: anyhow::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHookId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimestampHookId(u64);

/// Predicate and callback fused. `None` means the predicate did not match.
type EventCallback<E> = Rc<dyn Fn(&E) -> Option<Result<()>>>;

type TimestampCallback = Rc<dyn Fn(Timestamp) -> Result<()>>;

struct EventHook<E> {
    id: EventHookId,
    call: EventCallback<E>,
}

impl<E> Clone for EventHook<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            call: Rc::clone(&self.call),
        }
    }
}

/// One handle's event hooks. `any` holds hooks without a bucket key.
struct HandleHooks<E> {
    by_kind: HashMap<String, Vec<EventHook<E>>>,
    any: Vec<EventHook<E>>,
}

impl<E> Default for HandleHooks<E> {
    fn default() -> Self {
        Self {
            by_kind: HashMap::new(),
            any: Vec::new(),
        }
    }
}

impl<E> HandleHooks<E> {
    fn bucket_mut(&mut self, bucket: Option<&str>) -> &mut Vec<EventHook<E>> {
        match bucket {
            Some(kind) => self.by_kind.entry(kind.to_owned()).or_default(),
            None => &mut self.any,
        }
    }

    fn is_empty(&self) -> bool {
        self.by_kind.is_empty() && self.any.is_empty()
    }
}

/// Where an event hook lives, for identity-based removal.
struct HookLocation {
    handle: String,
    bucket: Option<String>,
}

struct TimestampHook {
    id: TimestampHookId,
    handle: String,
    timestamp: Timestamp,
    callback: TimestampCallback,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher<E> {
    timestamp: Cell<Timestamp>,
    next_id: Cell<u64>,
    event_hooks: RefCell<HashMap<String, HandleHooks<E>>>,
    locations: RefCell<HashMap<EventHookId, HookLocation>>,
    /// Sorted by timestamp descending: the next hook due is always last.
    timestamp_hooks: RefCell<Vec<TimestampHook>>,
    /// Reused between dispatches for the per-handle hook snapshot.
    scratch: RefCell<Vec<EventHook<E>>>,
}

impl<E: TimelineEvent> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TimelineEvent> Dispatcher<E> {
    pub fn new() -> Self {
        Self {
            timestamp: Cell::new(0),
            next_id: Cell::new(0),
            event_hooks: RefCell::new(HashMap::new()),
            locations: RefCell::new(HashMap::new()),
            timestamp_hooks: RefCell::new(Vec::new()),
            scratch: RefCell::new(Vec::new()),
        }
    }

    /// Current position on the virtual clock. Never moves backwards.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp.get()
    }

    /// Run due timestamp hooks, then event hooks, for the given handles.
    pub fn dispatch(&self, event: &E, handles: &[String]) -> Vec<DispatchIssue> {
        let mut issues = Vec::new();

        self.run_timestamp_hooks(event.timestamp(), handles, &mut issues);
        self.advance_to(event.timestamp());

        // Taken rather than borrowed so a nested dispatch gets its own buffer.
        let mut hooks = self.scratch.take();
        for handle in handles {
            self.snapshot(handle, event.kind(), &mut hooks);
            for hook in hooks.drain(..) {
                // Removed by an earlier callback in this same dispatch.
                if !self.locations.borrow().contains_key(&hook.id) {
                    continue;
                }
                if let Some(Err(error)) = (hook.call)(event) {
                    issues.push(DispatchIssue {
                        handle: handle.clone(),
                        error,
                    });
                    // Isolation is per handle: skip its remaining hooks only.
                    break;
                }
            }
        }
        hooks.clear();
        self.scratch.replace(hooks);

        issues
    }

    fn run_timestamp_hooks(
        &self,
        until: Timestamp,
        handles: &[String],
        issues: &mut Vec<DispatchIssue>,
    ) {
        loop {
            let due = {
                let mut queue = self.timestamp_hooks.borrow_mut();
                if queue.last().is_some_and(|hook| hook.timestamp <= until) {
                    queue.pop()
                } else {
                    None
                }
            };
            let Some(hook) = due else { break };

            // Popped either way. A hook whose owner is inactive for this
            // dispatch is gone for good, even if the owner comes back.
            if !handles.iter().any(|h| *h == hook.handle) {
                debug!(
                    handle = hook.handle.as_str(),
                    timestamp = hook.timestamp,
                    "Discarding timestamp hook for inactive module"
                );
                continue;
            }

            self.advance_to(hook.timestamp);
            if let Err(error) = (hook.callback)(hook.timestamp) {
                issues.push(DispatchIssue {
                    handle: hook.handle,
                    error,
                });
            }
        }
    }

    fn advance_to(&self, timestamp: Timestamp) {
        if timestamp > self.timestamp.get() {
            self.timestamp.set(timestamp);
        }
    }

    /// Copy into `into` the hooks for `handle` that could match `kind`: its
    /// exact bucket, then the any bucket.
    fn snapshot(&self, handle: &str, kind: &str, into: &mut Vec<EventHook<E>>) {
        into.clear();
        let registry = self.event_hooks.borrow();
        let Some(hooks) = registry.get(handle) else {
            return;
        };
        into.extend(
            hooks
                .by_kind
                .get(kind)
                .into_iter()
                .flatten()
                .chain(hooks.any.iter())
                .cloned(),
        );
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    // -----------------------------------------------------------------------
    // Event hooks
    // -----------------------------------------------------------------------

    /// Register a hook owned by `handle`. The predicate runs for every
    /// candidate event; its bucket key only decides which events are candidates.
    pub fn add_event_hook<P, F>(&self, handle: &str, predicate: P, callback: F) -> EventHookId
    where
        P: Predicate<E>,
        F: Fn(&P::Output) -> Result<()> + 'static,
    {
        let id = EventHookId(self.next_id());
        let bucket = predicate.bucket_key().map(str::to_owned);

        let call: EventCallback<E> =
            Rc::new(move |event: &E| predicate.narrow(event).map(|narrowed| callback(narrowed)));

        self.event_hooks
            .borrow_mut()
            .entry(handle.to_owned())
            .or_default()
            .bucket_mut(bucket.as_deref())
            .push(EventHook { id, call });

        debug!(handle, bucket = bucket.as_deref().unwrap_or("*"), "Event hook added");

        self.locations.borrow_mut().insert(
            id,
            HookLocation {
                handle: handle.to_owned(),
                bucket,
            },
        );
        id
    }

    /// Remove an event hook by identity. Only its owner may remove it.
    /// Returns whether a hook was removed.
    pub fn remove_event_hook(&self, handle: &str, id: EventHookId) -> bool {
        let location = {
            let mut locations = self.locations.borrow_mut();
            match locations.get(&id) {
                Some(location) if location.handle == handle => locations.remove(&id),
                _ => None,
            }
        };
        let Some(location) = location else {
            return false;
        };

        let mut registry = self.event_hooks.borrow_mut();
        let Some(hooks) = registry.get_mut(&location.handle) else {
            return false;
        };

        hooks
            .bucket_mut(location.bucket.as_deref())
            .retain(|hook| hook.id != id);

        if let Some(kind) = &location.bucket {
            if hooks.by_kind.get(kind).is_some_and(Vec::is_empty) {
                hooks.by_kind.remove(kind);
            }
        }
        if hooks.is_empty() {
            registry.remove(&location.handle);
        }
        true
    }

    /// Number of event hooks registered for a handle.
    pub fn event_hook_count(&self, handle: &str) -> usize {
        self.event_hooks
            .borrow()
            .get(handle)
            .map(|hooks| hooks.any.len() + hooks.by_kind.values().map(Vec::len).sum::<usize>())
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Timestamp hooks
    // -----------------------------------------------------------------------

    /// Schedule a one-shot callback. A timestamp already behind the virtual
    /// clock is dropped without being queued.
    pub fn add_timestamp_hook<F>(
        &self,
        handle: &str,
        timestamp: Timestamp,
        callback: F,
    ) -> TimestampHookId
    where
        F: Fn(Timestamp) -> Result<()> + 'static,
    {
        let id = TimestampHookId(self.next_id());

        if timestamp < self.timestamp.get() {
            debug!(
                handle,
                timestamp,
                now = self.timestamp.get(),
                "Dropping timestamp hook scheduled in the past"
            );
            return id;
        }

        let mut queue = self.timestamp_hooks.borrow_mut();
        // Walk in from the due end. Equal timestamps keep registration order.
        let mut index = queue.len();
        while index > 0 && queue[index - 1].timestamp <= timestamp {
            index -= 1;
        }
        queue.insert(
            index,
            TimestampHook {
                id,
                handle: handle.to_owned(),
                timestamp,
                callback: Rc::new(callback),
            },
        );
        id
    }

    pub fn remove_timestamp_hook(&self, handle: &str, id: TimestampHookId) -> bool {
        let mut queue = self.timestamp_hooks.borrow_mut();
        let before = queue.len();
        queue.retain(|hook| !(hook.id == id && hook.handle == handle));
        queue.len() != before
    }

    /// Number of timestamp hooks still queued.
    pub fn pending_timestamp_hooks(&self) -> usize {
        self.timestamp_hooks.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use timeline_events::{filter, from_fn, kind, DamageEvent, Event};

    fn damage(timestamp: Timestamp, amount: u64) -> Event {
        Event::Damage(DamageEvent {
            timestamp,
            source: 1,
            target: 2,
            action: 3,
            amount,
            overkill: 0,
            critical: false,
        })
    }

    fn handles(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    type Log = Rc<RefCell<Vec<String>>>;

    fn log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn fires_matching_hooks_for_active_handles_only() {
        let dispatcher = Dispatcher::<Event>::new();
        let seen = log();

        for name in ["a", "b"] {
            let seen = seen.clone();
            dispatcher.add_event_hook(name, filter().kind(kind::DAMAGE), move |_: &Event| {
                seen.borrow_mut().push(name.to_string());
                Ok(())
            });
        }

        let issues = dispatcher.dispatch(&damage(10, 1), &handles(&["a"]));
        assert!(issues.is_empty());
        assert_eq!(*seen.borrow(), vec!["a"]);
    }

    #[test]
    fn kind_bucket_runs_before_any_bucket() {
        let dispatcher = Dispatcher::<Event>::new();
        let seen = log();

        let s = seen.clone();
        dispatcher.add_event_hook("a", from_fn(|_: &Event| true), move |_| {
            s.borrow_mut().push("any".into());
            Ok(())
        });
        let s = seen.clone();
        dispatcher.add_event_hook("a", filter().kind(kind::DAMAGE), move |_: &Event| {
            s.borrow_mut().push("damage".into());
            Ok(())
        });

        dispatcher.dispatch(&damage(0, 1), &handles(&["a"]));
        assert_eq!(*seen.borrow(), vec!["damage", "any"]);
    }

    #[test]
    fn predicate_still_evaluated_within_bucket() {
        let dispatcher = Dispatcher::<Event>::new();
        let seen = log();

        let s = seen.clone();
        let big = filter()
            .kind(kind::DAMAGE)
            .field_matches(Event::amount, |a: &u64| *a > 100)
            .narrow(Event::as_damage);
        dispatcher.add_event_hook("a", big, move |hit: &DamageEvent| {
            s.borrow_mut().push(hit.amount.to_string());
            Ok(())
        });

        dispatcher.dispatch(&damage(0, 50), &handles(&["a"]));
        dispatcher.dispatch(&damage(1, 500), &handles(&["a"]));
        assert_eq!(*seen.borrow(), vec!["500"]);
    }

    #[test]
    fn error_stops_only_the_failing_handle() {
        let dispatcher = Dispatcher::<Event>::new();
        let seen = log();

        dispatcher.add_event_hook("broken", filter(), |_: &Event| bail!("boom"));
        let s = seen.clone();
        dispatcher.add_event_hook("broken", filter(), move |_: &Event| {
            s.borrow_mut().push("broken-second".into());
            Ok(())
        });
        let s = seen.clone();
        dispatcher.add_event_hook("healthy", filter(), move |_: &Event| {
            s.borrow_mut().push("healthy".into());
            Ok(())
        });

        let issues = dispatcher.dispatch(&damage(0, 1), &handles(&["broken", "healthy"]));

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].handle, "broken");
        assert_eq!(issues[0].error.to_string(), "boom");
        assert_eq!(*seen.borrow(), vec!["healthy"]);
    }

    #[test]
    fn snapshot_buffer_is_reused_and_left_empty() {
        let dispatcher = Dispatcher::<Event>::new();
        let seen = log();

        dispatcher.add_event_hook("broken", filter(), |_: &Event| bail!("boom"));
        dispatcher.add_event_hook("broken", filter(), |_: &Event| Ok(()));
        let s = seen.clone();
        dispatcher.add_event_hook("healthy", filter(), move |event: &Event| {
            s.borrow_mut().push(event.timestamp().to_string());
            Ok(())
        });

        let active = handles(&["broken", "missing", "healthy"]);
        for timestamp in [1, 2, 3] {
            let issues = dispatcher.dispatch(&damage(timestamp, 1), &active);
            assert_eq!(issues.len(), 1);
            assert!(dispatcher.scratch.borrow().is_empty());
        }

        assert_eq!(*seen.borrow(), vec!["1", "2", "3"]);
        assert!(dispatcher.scratch.borrow().capacity() >= 2);
    }

    #[test]
    fn removal_is_by_identity_and_prunes_empty_buckets() {
        let dispatcher = Dispatcher::<Event>::new();
        let first = dispatcher.add_event_hook("a", filter().kind(kind::DAMAGE), |_: &Event| Ok(()));
        let second =
            dispatcher.add_event_hook("a", filter().kind(kind::DAMAGE), |_: &Event| Ok(()));
        assert_eq!(dispatcher.event_hook_count("a"), 2);

        assert!(!dispatcher.remove_event_hook("someone-else", first));
        assert!(dispatcher.remove_event_hook("a", first));
        assert!(!dispatcher.remove_event_hook("a", first));
        assert_eq!(dispatcher.event_hook_count("a"), 1);

        assert!(dispatcher.remove_event_hook("a", second));
        assert_eq!(dispatcher.event_hook_count("a"), 0);
        assert!(dispatcher.event_hooks.borrow().get("a").is_none());
    }

    #[test]
    fn hook_removed_mid_dispatch_does_not_fire() {
        let dispatcher = Rc::new(Dispatcher::<Event>::new());
        let seen = log();
        let victim: Rc<Cell<Option<EventHookId>>> = Rc::new(Cell::new(None));

        let d = Rc::downgrade(&dispatcher);
        let v = victim.clone();
        dispatcher.add_event_hook("a", filter(), move |_: &Event| {
            if let (Some(d), Some(id)) = (d.upgrade(), v.get()) {
                d.remove_event_hook("a", id);
            }
            Ok(())
        });
        let s = seen.clone();
        let id = dispatcher.add_event_hook("a", filter(), move |_: &Event| {
            s.borrow_mut().push("victim".into());
            Ok(())
        });
        victim.set(Some(id));

        dispatcher.dispatch(&damage(0, 1), &handles(&["a"]));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn timestamp_hooks_fire_in_order_before_event_hooks() {
        let dispatcher = Rc::new(Dispatcher::<Event>::new());
        let seen = log();

        for ts in [300, 100, 200] {
            let s = seen.clone();
            let d = Rc::downgrade(&dispatcher);
            dispatcher.add_timestamp_hook("a", ts, move |at| {
                let now = d.upgrade().map(|d| d.timestamp()).unwrap_or_default();
                s.borrow_mut().push(format!("ts:{at}@{now}"));
                Ok(())
            });
        }
        let s = seen.clone();
        dispatcher.add_event_hook("a", filter(), move |e: &Event| {
            s.borrow_mut().push(format!("event:{}", e.timestamp()));
            Ok(())
        });

        dispatcher.dispatch(&damage(250, 1), &handles(&["a"]));

        assert_eq!(
            *seen.borrow(),
            vec!["ts:100@100", "ts:200@200", "event:250"]
        );
        assert_eq!(dispatcher.pending_timestamp_hooks(), 1);
        assert_eq!(dispatcher.timestamp(), 250);
    }

    #[test]
    fn equal_timestamps_keep_registration_order() {
        let dispatcher = Dispatcher::<Event>::new();
        let seen = log();
        for name in ["first", "second", "third"] {
            let s = seen.clone();
            dispatcher.add_timestamp_hook("a", 50, move |_| {
                s.borrow_mut().push(name.into());
                Ok(())
            });
        }

        dispatcher.dispatch(&damage(50, 1), &handles(&["a"]));
        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn past_timestamp_hook_is_never_queued() {
        let dispatcher = Dispatcher::<Event>::new();
        dispatcher.dispatch(&damage(1_000, 1), &handles(&["a"]));

        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        dispatcher.add_timestamp_hook("a", 999, move |_| {
            f.set(true);
            Ok(())
        });

        assert_eq!(dispatcher.pending_timestamp_hooks(), 0);
        dispatcher.dispatch(&damage(2_000, 1), &handles(&["a"]));
        assert!(!fired.get());
    }

    #[test]
    fn timestamp_hook_for_inactive_handle_is_discarded() {
        let dispatcher = Dispatcher::<Event>::new();
        let fired = Rc::new(Cell::new(0));

        let f = fired.clone();
        dispatcher.add_timestamp_hook("sleepy", 10, move |_| {
            f.set(f.get() + 1);
            Ok(())
        });

        dispatcher.dispatch(&damage(20, 1), &handles(&["other"]));
        dispatcher.dispatch(&damage(30, 1), &handles(&["sleepy"]));

        assert_eq!(fired.get(), 0);
        assert_eq!(dispatcher.pending_timestamp_hooks(), 0);
    }

    #[test]
    fn timestamp_hook_errors_do_not_abort_the_queue() {
        let dispatcher = Dispatcher::<Event>::new();
        let fired = Rc::new(Cell::new(false));

        dispatcher.add_timestamp_hook("a", 10, |_| bail!("tick failed"));
        let f = fired.clone();
        dispatcher.add_timestamp_hook("b", 20, move |_| {
            f.set(true);
            Ok(())
        });

        let issues = dispatcher.dispatch(&damage(30, 1), &handles(&["a", "b"]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].handle, "a");
        assert!(fired.get());
    }

    #[test]
    fn removed_timestamp_hook_never_fires() {
        let dispatcher = Dispatcher::<Event>::new();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        let id = dispatcher.add_timestamp_hook("a", 10, move |_| {
            f.set(true);
            Ok(())
        });

        assert!(!dispatcher.remove_timestamp_hook("b", id));
        assert!(dispatcher.remove_timestamp_hook("a", id));
        dispatcher.dispatch(&damage(30, 1), &handles(&["a"]));
        assert!(!fired.get());
    }
}
