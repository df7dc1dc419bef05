use anyhow::Result;
use timeline_engine::{Construct, Hooks, Module, ModuleInfo};
use timeline_events::{filter, kind, DeathEvent, Event};

/// Death log. Nothing to show when nobody died.
#[derive(Debug, Default)]
pub struct Deaths {
    log: Vec<DeathEvent>,
}

impl Deaths {
    pub fn count(&self) -> usize {
        self.log.len()
    }

    pub fn entries(&self) -> &[DeathEvent] {
        &self.log
    }
}

impl ModuleInfo for Deaths {
    const HANDLE: &'static str = "deaths";
    const TITLE: Option<&'static str> = Some("Deaths");
}

impl Module<Event> for Deaths {
    fn build(_ctx: &Construct<'_, Self, Event>) -> Self {
        Deaths::default()
    }

    fn initialise(&mut self, hooks: &Hooks<Self, Event>) -> Result<()> {
        let deaths = filter::<Event>().kind(kind::DEATH).narrow(Event::as_death);
        hooks.add_event_hook(deaths, |me: &mut Self, death: &DeathEvent| {
            me.log.push(death.clone());
            Ok(())
        });
        Ok(())
    }

    fn output(&mut self) -> Result<Option<serde_json::Value>> {
        if self.log.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_value(&self.log)?))
    }
}
