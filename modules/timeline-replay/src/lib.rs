//! Replays a combat log through the bundled analysis modules.

pub mod analysers;
pub mod config;

use std::path::Path;

use anyhow::{bail, Context, Result};
use timeline_events::{Event, TimelineEvent};

pub use config::{load_config, ReplayConfig};

/// Load an event log: a JSON array of events sorted by timestamp.
pub fn load_events(path: &Path) -> Result<Vec<Event>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event log: {}", path.display()))?;
    parse_events(&content).with_context(|| format!("Failed to parse event log: {}", path.display()))
}

pub fn parse_events(content: &str) -> Result<Vec<Event>> {
    let events: Vec<Event> = serde_json::from_str(content)?;
    if let Some(pair) = events.windows(2).find(|w| w[1].timestamp() < w[0].timestamp()) {
        bail!(
            "Events out of order: {} at {} follows {}",
            pair[1].kind(),
            pair[1].timestamp(),
            pair[0].timestamp()
        );
    }
    Ok(events)
}
