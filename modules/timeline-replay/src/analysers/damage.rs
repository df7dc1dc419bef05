use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use timeline_engine::{Construct, Hooks, Module, ModuleInfo};
use timeline_events::{filter, kind, ActorId, DamageEvent, Event};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageTotals {
    pub amount: u64,
    pub hits: u32,
    pub critical_hits: u32,
    pub overkill: u64,
}

/// Damage dealt per source. Restricted to the focused actor when the run
/// has one.
#[derive(Debug)]
pub struct Damage {
    focus: Option<ActorId>,
    by_source: BTreeMap<ActorId, DamageTotals>,
}

impl Damage {
    pub fn totals_for(&self, source: ActorId) -> DamageTotals {
        self.by_source.get(&source).copied().unwrap_or_default()
    }

    pub fn total(&self) -> u64 {
        self.by_source.values().map(|t| t.amount).sum()
    }

    fn record(&mut self, hit: &DamageEvent) {
        let totals = self.by_source.entry(hit.source).or_default();
        totals.amount += hit.amount;
        totals.overkill += hit.overkill;
        totals.hits += 1;
        if hit.critical {
            totals.critical_hits += 1;
        }
    }
}

impl ModuleInfo for Damage {
    const HANDLE: &'static str = "damage";
    const TITLE: Option<&'static str> = Some("Damage done");
}

impl Module<Event> for Damage {
    fn build(ctx: &Construct<'_, Self, Event>) -> Self {
        Damage {
            focus: ctx.context().actor,
            by_source: BTreeMap::new(),
        }
    }

    fn initialise(&mut self, hooks: &Hooks<Self, Event>) -> Result<()> {
        let mut hits = filter::<Event>().kind(kind::DAMAGE);
        if let Some(actor) = self.focus {
            hits = hits.field_eq(Event::source, actor);
        }
        hooks.add_event_hook(hits.narrow(Event::as_damage), |me: &mut Self, hit: &DamageEvent| {
            me.record(hit);
            Ok(())
        });
        Ok(())
    }

    fn output(&mut self) -> Result<Option<serde_json::Value>> {
        let sources: Vec<_> = self
            .by_source
            .iter()
            .map(|(source, totals)| json!({ "source": source, "totals": totals }))
            .collect();
        Ok(Some(json!({ "total": self.total(), "sources": sources })))
    }
}
