//! Reference analysis modules bundled with `replay`.

pub mod actors;
pub mod damage;
pub mod deaths;
pub mod status_uptime;
pub mod summary;

use anyhow::{bail, Result};
use timeline_engine::ModuleDescriptor;
use timeline_events::Event;

pub use actors::Actors;
pub use damage::{Damage, DamageTotals};
pub use deaths::Deaths;
pub use status_uptime::StatusUptime;
pub use summary::Summary;

/// Every bundled module.
pub fn all() -> Vec<ModuleDescriptor<Event>> {
    vec![
        ModuleDescriptor::of::<Actors>(),
        ModuleDescriptor::of::<Damage>(),
        ModuleDescriptor::of::<Deaths>(),
        ModuleDescriptor::of::<StatusUptime>(),
        ModuleDescriptor::of::<Summary>(),
    ]
}

/// Bundled modules restricted to `enabled`. Empty means all of them.
/// Dependencies are not pulled in automatically.
pub fn select(enabled: &[String]) -> Result<Vec<ModuleDescriptor<Event>>> {
    let available = all();
    if enabled.is_empty() {
        return Ok(available);
    }

    if let Some(unknown) = enabled
        .iter()
        .find(|handle| !available.iter().any(|d| d.handle() == handle.as_str()))
    {
        bail!("Unknown module handle: {unknown}");
    }

    Ok(available
        .into_iter()
        .filter(|d| enabled.iter().any(|handle| handle == d.handle()))
        .collect())
}
