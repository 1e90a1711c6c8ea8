//! StateStore: redb-backed persistence for nopas.
//!
//! Stores the active `PolicyState` and the scaling event history. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use nopas_core::PolicyState;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Disambiguates events recorded in the same millisecond.
    seq: Arc<AtomicU64>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(POLICY).map_err(map_err!(Table))?;
        txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Policy ─────────────────────────────────────────────────────

    /// Replace the stored policy state.
    pub fn put_policy(&self, state: &PolicyState) -> StateResult<()> {
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POLICY).map_err(map_err!(Table))?;
            table
                .insert(CURRENT_POLICY_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            resources = state.resources.len(),
            subpolicies = state.subpolicies.len(),
            "policy stored"
        );
        Ok(())
    }

    pub fn get_policy(&self) -> StateResult<Option<PolicyState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICY).map_err(map_err!(Table))?;
        match table.get(CURRENT_POLICY_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let state: PolicyState =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    // ── Scaling events ─────────────────────────────────────────────

    pub fn put_event(&self, event: &ScalingEvent) -> StateResult<()> {
        let key = event.table_key(self.seq.fetch_add(1, Ordering::Relaxed));
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "scaling event stored");
        Ok(())
    }

    /// Most recent events for one resource, newest first.
    pub fn list_events_for_resource(
        &self,
        resource: &str,
        limit: usize,
    ) -> StateResult<Vec<ScalingEvent>> {
        let start = ScalingEvent::key_prefix(resource);
        // ';' sorts right after ':', so this bounds the prefix.
        let end = format!("{resource};");

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: ScalingEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            // Names containing ':' can share a prefix with another resource.
            if event.resource == resource {
                results.push(event);
            }
        }
        Ok(results)
    }

    /// Delete events older than `epoch_ms`. Returns number deleted.
    pub fn prune_events_before(&self, epoch_ms: u64) -> StateResult<u32> {
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let event: ScalingEvent =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if event.at_ms < epoch_ms {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };

        if keys.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0u32;
        {
            let mut table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
            for key in &keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    count += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(before = epoch_ms, count, "scaling events pruned");
        Ok(count)
    }
}
