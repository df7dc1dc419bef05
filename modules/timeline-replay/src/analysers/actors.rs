use std::collections::BTreeSet;

use anyhow::Result;
use timeline_engine::{Construct, Hooks, Module, ModuleInfo};
use timeline_events::{filter, ActorId, Event};

/// Every actor id that shows up as a source or target.
#[derive(Debug, Default)]
pub struct Actors {
    seen: BTreeSet<ActorId>,
}

impl Actors {
    pub fn contains(&self, actor: ActorId) -> bool {
        self.seen.contains(&actor)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.seen.iter().copied()
    }
}

impl ModuleInfo for Actors {
    const HANDLE: &'static str = "actors";
}

impl Module<Event> for Actors {
    fn build(_ctx: &Construct<'_, Self, Event>) -> Self {
        Actors::default()
    }

    fn initialise(&mut self, hooks: &Hooks<Self, Event>) -> Result<()> {
        hooks.add_event_hook(filter(), |me: &mut Self, event: &Event| {
            me.seen.extend(event.source());
            me.seen.extend(event.target());
            Ok(())
        });
        Ok(())
    }
}
