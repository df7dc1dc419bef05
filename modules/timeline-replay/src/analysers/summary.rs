use anyhow::{anyhow, Result};
use serde_json::json;
use timeline_engine::{
    display_order, Construct, Dep, Dependencies, DisplayMode, Hooks, Module, ModuleInfo, RunContext,
};
use timeline_events::{filter, kind, Event, TimelineEvent, Timestamp};

use super::damage::Damage;
use super::deaths::Deaths;

/// Headline numbers for the pull, shown above everything else.
pub struct Summary {
    totals: Option<Dep<Damage>>,
    deaths: Option<Dep<Deaths>>,
    context: RunContext,
    started: Timestamp,
    finished: Timestamp,
}

impl ModuleInfo for Summary {
    const HANDLE: &'static str = "summary";
    const TITLE: Option<&'static str> = Some("Summary");
    const DISPLAY_ORDER: i32 = display_order::TOP;
    const DISPLAY_MODE: DisplayMode = DisplayMode::Full;

    fn dependencies() -> Dependencies {
        Dependencies::new().aliased("damage", "totals").named("deaths")
    }
}

impl Module<Event> for Summary {
    fn build(ctx: &Construct<'_, Self, Event>) -> Self {
        Summary {
            totals: ctx.dependency("totals"),
            deaths: ctx.dependency("deaths"),
            context: ctx.context().clone(),
            started: 0,
            finished: 0,
        }
    }

    fn initialise(&mut self, hooks: &Hooks<Self, Event>) -> Result<()> {
        self.started = hooks.timestamp();
        hooks.add_event_hook(filter().kind(kind::COMPLETE), |me: &mut Self, event: &Event| {
            me.finished = event.timestamp();
            Ok(())
        });
        Ok(())
    }

    fn output(&mut self) -> Result<Option<serde_json::Value>> {
        let totals = self
            .totals
            .as_ref()
            .ok_or_else(|| anyhow!("damage totals are not available"))?;
        let damage = totals.borrow().total();
        let deaths = self.deaths.as_ref().map_or(0, |d| d.borrow().count());

        let duration = (self.finished - self.started).max(0);
        let dps = if duration > 0 {
            damage as f64 * 1_000.0 / duration as f64
        } else {
            0.0
        };

        Ok(Some(json!({
            "report": self.context.report,
            "pull": self.context.pull,
            "actor": self.context.actor,
            "duration": duration,
            "damage": damage,
            "dps": dps,
            "deaths": deaths,
        })))
    }
}
