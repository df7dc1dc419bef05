use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{anyhow, Result};
use serde_json::json;
use timeline_engine::{Construct, Dep, Dependencies, Hooks, Module, ModuleInfo, TimestampHookId};
use timeline_events::{filter, kind, ActorId, Event, StatusEvent, TimelineEvent, Timestamp};

use super::actors::Actors;

/// (target, status)
type WindowKey = (ActorId, u32);

#[derive(Debug)]
struct Window {
    source: ActorId,
    opened: Timestamp,
    expiry: Option<TimestampHookId>,
}

/// How long each status was up across the fight.
///
/// Applications with a duration expire on their own: the window is closed
/// at `apply + duration` and a `statusRemove` is fabricated for anyone else
/// listening. Reapplying an open status refreshes its expiry.
pub struct StatusUptime {
    actors: Option<Dep<Actors>>,
    hooks: Hooks<StatusUptime, Event>,
    open: HashMap<WindowKey, Window>,
    uptime: BTreeMap<u32, Timestamp>,
    affected: BTreeMap<u32, BTreeSet<ActorId>>,
    started: Timestamp,
    finished: Timestamp,
}

impl StatusUptime {
    /// Total time `status` was up, summed over targets.
    pub fn uptime(&self, status: u32) -> Timestamp {
        self.uptime.get(&status).copied().unwrap_or(0)
    }

    pub fn is_open(&self, target: ActorId, status: u32) -> bool {
        self.open.contains_key(&(target, status))
    }

    fn apply(&mut self, status: &StatusEvent) {
        let key = (status.target, status.status);
        let expiry = status.duration.map(|duration| {
            self.hooks
                .add_timestamp_hook(status.timestamp + duration, move |me: &mut Self, at| {
                    me.expire(key, at);
                    Ok(())
                })
        });

        match self.open.get_mut(&key) {
            Some(window) => {
                if let Some(previous) = window.expiry.take() {
                    self.hooks.remove_timestamp_hook(previous);
                }
                window.expiry = expiry;
                window.source = status.source;
            }
            None => {
                self.open.insert(
                    key,
                    Window {
                        source: status.source,
                        opened: status.timestamp,
                        expiry,
                    },
                );
                self.affected.entry(status.status).or_default().insert(status.target);
            }
        }
    }

    fn close(&mut self, key: WindowKey, at: Timestamp) -> Option<Window> {
        let window = self.open.remove(&key)?;
        if let Some(expiry) = window.expiry {
            self.hooks.remove_timestamp_hook(expiry);
        }
        *self.uptime.entry(key.1).or_default() += (at - window.opened).max(0);
        Some(window)
    }

    /// A remove older than the open window belongs to an earlier application,
    /// e.g. our own fabricated expiry arriving after a reapply.
    fn remove(&mut self, status: &StatusEvent) {
        let key = (status.target, status.status);
        let current = self
            .open
            .get(&key)
            .is_some_and(|window| status.timestamp >= window.opened);
        if current {
            self.close(key, status.timestamp);
        }
    }

    fn expire(&mut self, key: WindowKey, at: Timestamp) {
        if let Some(window) = self.close(key, at) {
            self.hooks.queue_event(Event::StatusRemove(StatusEvent {
                timestamp: at,
                source: window.source,
                target: key.0,
                status: key.1,
                duration: None,
            }));
        }
    }

    fn close_all(&mut self, at: Timestamp) {
        let keys: Vec<WindowKey> = self.open.keys().copied().collect();
        for key in keys {
            self.close(key, at);
        }
    }
}

impl ModuleInfo for StatusUptime {
    const HANDLE: &'static str = "status_uptime";
    const TITLE: Option<&'static str> = Some("Status uptime");

    fn dependencies() -> Dependencies {
        Dependencies::new().on::<Actors>("actors")
    }
}

impl Module<Event> for StatusUptime {
    fn build(ctx: &Construct<'_, Self, Event>) -> Self {
        StatusUptime {
            actors: ctx.dependency("actors"),
            hooks: ctx.hooks(),
            open: HashMap::new(),
            uptime: BTreeMap::new(),
            affected: BTreeMap::new(),
            started: 0,
            finished: 0,
        }
    }

    fn initialise(&mut self, hooks: &Hooks<Self, Event>) -> Result<()> {
        self.started = hooks.timestamp();

        let applied = filter::<Event>().kind(kind::STATUS_APPLY).narrow(Event::as_status);
        hooks.add_event_hook(applied, |me: &mut Self, status: &StatusEvent| {
            me.apply(status);
            Ok(())
        });

        let removed = filter::<Event>().kind(kind::STATUS_REMOVE).narrow(Event::as_status);
        hooks.add_event_hook(removed, |me: &mut Self, status: &StatusEvent| {
            me.remove(status);
            Ok(())
        });

        hooks.add_event_hook(filter().kind(kind::COMPLETE), |me: &mut Self, event: &Event| {
            me.finished = event.timestamp();
            me.close_all(event.timestamp());
            Ok(())
        });
        Ok(())
    }

    fn output(&mut self) -> Result<Option<serde_json::Value>> {
        if self.uptime.is_empty() {
            return Ok(None);
        }

        let actors = self
            .actors
            .as_ref()
            .ok_or_else(|| anyhow!("actors dependency is not available"))?;
        let tracked = actors.borrow().len();
        let duration = (self.finished - self.started).max(0);

        let statuses: Vec<_> = self
            .uptime
            .iter()
            .map(|(status, up)| {
                let targets = self.affected.get(status).map_or(0, BTreeSet::len);
                json!({
                    "status": status,
                    "uptime": up,
                    "targets": targets,
                    "percent": percent(*up, duration * targets as Timestamp),
                })
            })
            .collect();

        Ok(Some(json!({
            "duration": duration,
            "actors": tracked,
            "statuses": statuses,
        })))
    }
}

fn percent(part: Timestamp, whole: Timestamp) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    part as f64 * 100.0 / whole as f64
}
