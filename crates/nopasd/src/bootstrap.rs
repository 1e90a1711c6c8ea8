//! Startup: resolve the policy state and the cycle interval.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{info, warn};

use nopas_core::{PolicyState, parse_duration};
use nopas_state::StateStore;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// A `--policy` file wins and is persisted; otherwise the stored state
/// is used. Neither is a startup error.
pub fn load_policy_state(store: &StateStore, policy_file: Option<&Path>) -> anyhow::Result<PolicyState> {
    if let Some(path) = policy_file {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        let state = PolicyState::from_json(&bytes)
            .with_context(|| format!("failed to decode policy file {}", path.display()))?;
        store.put_policy(&state)?;
        info!(path = %path.display(), "policy loaded from file and persisted");
        return Ok(state);
    }

    match store.get_policy()? {
        Some(state) => {
            info!("policy loaded from state store");
            Ok(state)
        }
        None => bail!("no policy: pass --policy <file> or start from a data dir with a stored policy"),
    }
}

/// The CLI override if given, else `CheckingFreq`, else one minute.
pub fn resolve_interval(cli_override: Option<&str>, state: &PolicyState) -> anyhow::Result<Duration> {
    if let Some(raw) = cli_override {
        return parse_duration(raw)
            .filter(|d| !d.is_zero())
            .with_context(|| format!("invalid --interval {raw:?}"));
    }

    match state.checking_interval() {
        Some(interval) => Ok(interval),
        None => {
            warn!(
                checking_freq = %state.checking_freq,
                default_secs = DEFAULT_INTERVAL.as_secs(),
                "invalid CheckingFreq, using default"
            );
            Ok(DEFAULT_INTERVAL)
        }
    }
}
