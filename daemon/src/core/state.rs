// Durable state snapshot.
//
// The alarm cache, block tapes and node outage timestamps survive a
// restart through one JSON file. Entries older than a day are
// discarded on load and re-evaluated from scratch.

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_common::{api::dashboard::BlockOutcome, time::TimestampMillis};

use crate::{
    config::{MILLIS_PER_SECOND, STALE_ALARM_MAX_AGE_SECONDS},
    core::{alerts::AlarmState, App},
};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub alarms: AlarmState,
    // chain name -> ordered outcome tape
    #[serde(default)]
    pub blocks: HashMap<String, Vec<BlockOutcome>>,
    // chain name -> node url -> down since
    #[serde(default)]
    pub nodes_down: HashMap<String, HashMap<String, DateTime<Utc>>>,
}

// Load and prune the snapshot; a missing file is a clean start
pub fn load(path: &Path, now: TimestampMillis) -> Result<Option<PersistedState>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read state file {}", path.display()))?;
    let mut state: PersistedState = serde_json::from_str(&content)
        .with_context(|| format!("could not parse state file {}", path.display()))?;
    state
        .alarms
        .prune(now, STALE_ALARM_MAX_AGE_SECONDS * MILLIS_PER_SECOND);
    Ok(Some(state))
}

// Apply a loaded snapshot onto freshly built chain monitors
pub async fn restore(app: &Arc<App>, persisted: &PersistedState) {
    for chain in &app.chains {
        if let Some(outcomes) = persisted.blocks.get(&chain.name) {
            chain.state.write().await.tape.restore(outcomes.clone());
        }
        if let Some(down) = persisted.nodes_down.get(&chain.name) {
            let down: HashMap<String, TimestampMillis> = down
                .iter()
                .map(|(url, since)| (url.clone(), since.timestamp_millis() as TimestampMillis))
                .collect();
            chain.fleet.restore_down_since(&down).await;
        }
    }
    info!(
        "restored state: {} chains with alarm history",
        persisted.alarms.sent_all_alarms.len()
    );
}

// Serialize the live state back to disk
pub async fn save(app: &Arc<App>) -> Result<()> {
    let mut blocks = HashMap::new();
    let mut nodes_down = HashMap::new();

    for chain in &app.chains {
        let state = chain.state.read().await;
        blocks.insert(chain.name.clone(), state.tape.snapshot());
        drop(state);

        let down = chain.fleet.export_down().await;
        if !down.is_empty() {
            let down: HashMap<String, DateTime<Utc>> = down
                .into_iter()
                .filter_map(|(url, since)| {
                    DateTime::<Utc>::from_timestamp_millis(since as i64)
                        .map(|since| (url, since))
                })
                .collect();
            nodes_down.insert(chain.name.clone(), down);
        }
    }

    let state = PersistedState {
        alarms: app.alarms.export().await,
        blocks,
        nodes_down,
    };

    let payload = serde_json::to_string_pretty(&state)?;
    let tmp = app.state_path.with_extension("tmp");
    std::fs::write(&tmp, payload)
        .with_context(|| format!("could not write state file {}", tmp.display()))?;
    std::fs::rename(&tmp, &app.state_path)
        .with_context(|| format!("could not move state file into {}", app.state_path.display()))?;
    debug!("state saved to {}", app.state_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alerts::AlarmEntry;

    #[test]
    fn test_roundtrip_and_prune() {
        let mut state = PersistedState::default();
        state.alarms.sent_all_alarms.insert(
            "chain".to_string(),
            HashMap::from([
                (
                    "fresh".to_string(),
                    AlarmEntry {
                        message: "boom".to_string(),
                        sent_time: 1_000_000,
                    },
                ),
                (
                    "stale".to_string(),
                    AlarmEntry {
                        message: "old boom".to_string(),
                        sent_time: 0,
                    },
                ),
            ]),
        );
        state.blocks.insert(
            "chain".to_string(),
            vec![BlockOutcome::Signed, BlockOutcome::Missed],
        );

        let dir = std::env::temp_dir().join("vigil-state-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        // load just past the stale window keeps only the fresh entry
        let day = STALE_ALARM_MAX_AGE_SECONDS * MILLIS_PER_SECOND + 1;
        let loaded = load(&path, day).unwrap().unwrap();
        let alarms = &loaded.alarms.sent_all_alarms["chain"];
        assert!(alarms.contains_key("fresh"));
        assert!(!alarms.contains_key("stale"));
        assert_eq!(loaded.blocks["chain"].len(), 2);

        std::fs::remove_file(&path).unwrap();
        assert!(load(&path, day).unwrap().is_none());
    }
}
