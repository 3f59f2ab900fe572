//! StateStore — redb-backed state persistence for RunnerGrid.
//!
//! Provides typed CRUD operations over fleet specs, worker records,
//! decisions, and fleet status snapshots. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

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
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
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
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(FLEETS).map_err(map_err!(Table))?;
        txn.open_table(WORKERS).map_err(map_err!(Table))?;
        txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        txn.open_table(FLEET_STATUS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Fleets ─────────────────────────────────────────────────────

    /// Insert or update a fleet spec.
    pub fn put_fleet(&self, spec: &FleetSpec) -> StateResult<()> {
        let value = serde_json::to_vec(spec).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(FLEETS).map_err(map_err!(Table))?;
            table
                .insert(spec.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(fleet_id = %spec.id, "fleet spec stored");
        Ok(())
    }

    /// Get a fleet spec by id.
    pub fn get_fleet(&self, fleet_id: &str) -> StateResult<Option<FleetSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FLEETS).map_err(map_err!(Table))?;
        match table.get(fleet_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let spec: FleetSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    /// List all fleet specs.
    pub fn list_fleets(&self) -> StateResult<Vec<FleetSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FLEETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let spec: FleetSpec =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(spec);
        }
        Ok(results)
    }

    /// Delete a fleet spec by id. Returns true if it existed.
    pub fn delete_fleet(&self, fleet_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(FLEETS).map_err(map_err!(Table))?;
            existed = table.remove(fleet_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%fleet_id, existed, "fleet spec deleted");
        Ok(existed)
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Insert or update a worker record.
    pub fn put_worker(&self, record: &WorkerRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all worker records for a fleet (by key prefix scan).
    pub fn list_workers_for_fleet(&self, fleet_id: &str) -> StateResult<Vec<WorkerRecord>> {
        let prefix = format!("{fleet_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: WorkerRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Delete a worker record. Returns true if it existed.
    pub fn delete_worker(&self, fleet_id: &str, worker_id: &str) -> StateResult<bool> {
        let key = format!("{fleet_id}:{worker_id}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Delete all worker records for a fleet. Returns number deleted.
    pub fn delete_workers_for_fleet(&self, fleet_id: &str) -> StateResult<u32> {
        let prefix = format!("{fleet_id}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Decisions ──────────────────────────────────────────────────

    /// Store the most recent scaling decision for a fleet.
    pub fn put_decision(&self, decision: &DecisionRecord) -> StateResult<()> {
        let value = serde_json::to_vec(decision).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
            table
                .insert(decision.fleet_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the most recent scaling decision for a fleet.
    pub fn get_decision(&self, fleet_id: &str) -> StateResult<Option<DecisionRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        match table.get(fleet_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let decision: DecisionRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(decision))
            }
            None => Ok(None),
        }
    }

    // ── Fleet status ───────────────────────────────────────────────

    /// Store a fleet status snapshot.
    pub fn put_fleet_status(&self, status: &FleetStatusRecord) -> StateResult<()> {
        let value = serde_json::to_vec(status).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(FLEET_STATUS).map_err(map_err!(Table))?;
            table
                .insert(status.fleet_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the status snapshot for a fleet.
    pub fn get_fleet_status(&self, fleet_id: &str) -> StateResult<Option<FleetStatusRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FLEET_STATUS).map_err(map_err!(Table))?;
        match table.get(fleet_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let status: FleetStatusRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Remove all per-fleet state (workers, decision, status). The fleet
    /// spec itself is left in place.
    pub fn clear_fleet_state(&self, fleet_id: &str) -> StateResult<()> {
        self.delete_workers_for_fleet(fleet_id)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
            table.remove(fleet_id).map_err(map_err!(Write))?;
            let mut table = txn.open_table(FLEET_STATUS).map_err(map_err!(Table))?;
            table.remove(fleet_id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fleet(id: &str) -> FleetSpec {
        FleetSpec {
            id: id.to_string(),
            repo: "acme/widgets".to_string(),
            labels: vec!["self-hosted".to_string(), "linux".to_string()],
            runner_group: None,
            scaling: ScalingConfig {
                min_runners: 0,
                max_runners: 10,
                jobs_per_runner: 2,
                scale_up_threshold: 0,
                scale_down_threshold: 0,
                cooldown_seconds: 300,
            },
            enabled: true,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_worker(fleet_id: &str, index: u32) -> WorkerRecord {
        WorkerRecord {
            id: format!("w-{index}"),
            fleet_id: fleet_id.to_string(),
            runner_id: Some(format!("{index}")),
            runner_name: format!("rg-{fleet_id}-{index}"),
            instance_id: format!("vm-{index}"),
            status: WorkerStatus::Active,
            jobs_completed: 0,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    // ── Fleet CRUD ─────────────────────────────────────────────────

    #[test]
    fn fleet_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let spec = test_fleet("linux-x64");

        store.put_fleet(&spec).unwrap();
        let retrieved = store.get_fleet("linux-x64").unwrap();

        assert_eq!(retrieved, Some(spec));
    }

    #[test]
    fn fleet_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_fleet("nope").unwrap().is_none());
    }

    #[test]
    fn fleet_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_fleet(&test_fleet("a")).unwrap();
        store.put_fleet(&test_fleet("b")).unwrap();
        store.put_fleet(&test_fleet("c")).unwrap();

        assert_eq!(store.list_fleets().unwrap().len(), 3);
    }

    #[test]
    fn fleet_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut spec = test_fleet("linux-x64");
        store.put_fleet(&spec).unwrap();

        spec.updated_at = 2000;
        spec.scaling.max_runners = 20;
        store.put_fleet(&spec).unwrap();

        let retrieved = store.get_fleet("linux-x64").unwrap().unwrap();
        assert_eq!(retrieved.scaling.max_runners, 20);
        assert_eq!(retrieved.updated_at, 2000);
    }

    #[test]
    fn fleet_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_fleet(&test_fleet("linux-x64")).unwrap();

        assert!(store.delete_fleet("linux-x64").unwrap());
        assert!(!store.delete_fleet("linux-x64").unwrap());
        assert!(store.get_fleet("linux-x64").unwrap().is_none());
    }

    // ── Worker CRUD ────────────────────────────────────────────────

    #[test]
    fn worker_records_scoped_to_fleet() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_worker(&test_worker("fleet-a", 0)).unwrap();
        store.put_worker(&test_worker("fleet-a", 1)).unwrap();
        store.put_worker(&test_worker("fleet-b", 0)).unwrap();

        let a = store.list_workers_for_fleet("fleet-a").unwrap();
        assert_eq!(a.len(), 2);
        let b = store.list_workers_for_fleet("fleet-b").unwrap();
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn worker_delete_single() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_worker(&test_worker("fleet-a", 0)).unwrap();

        assert!(store.delete_worker("fleet-a", "w-0").unwrap());
        assert!(!store.delete_worker("fleet-a", "w-0").unwrap());
        assert!(store.list_workers_for_fleet("fleet-a").unwrap().is_empty());
    }

    #[test]
    fn worker_delete_for_fleet() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_worker(&test_worker("fleet-a", 0)).unwrap();
        store.put_worker(&test_worker("fleet-a", 1)).unwrap();
        store.put_worker(&test_worker("fleet-b", 0)).unwrap();

        assert_eq!(store.delete_workers_for_fleet("fleet-a").unwrap(), 2);
        assert!(store.list_workers_for_fleet("fleet-a").unwrap().is_empty());
        assert_eq!(store.list_workers_for_fleet("fleet-b").unwrap().len(), 1);
    }

    // ── Decisions & status ─────────────────────────────────────────

    #[test]
    fn decision_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let decision = DecisionRecord {
            fleet_id: "linux-x64".to_string(),
            action: ScaleAction::ScaleUp,
            target: 3,
            current: 1,
            reason: "queue demands 3 runners".to_string(),
            pending_jobs: 5,
            decided_at: 1000,
        };

        store.put_decision(&decision).unwrap();
        assert_eq!(store.get_decision("linux-x64").unwrap(), Some(decision));
    }

    #[test]
    fn fleet_status_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let status = FleetStatusRecord {
            fleet_id: "linux-x64".to_string(),
            tracked_workers: 4,
            active_workers: 3,
            degraded: false,
            consecutive_provision_failures: 0,
            last_action_at: Some(900),
            updated_at: 1000,
        };

        store.put_fleet_status(&status).unwrap();
        assert_eq!(store.get_fleet_status("linux-x64").unwrap(), Some(status));
    }

    #[test]
    fn clear_fleet_state_removes_everything_but_spec() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_fleet(&test_fleet("linux-x64")).unwrap();
        store.put_worker(&test_worker("linux-x64", 0)).unwrap();
        store
            .put_decision(&DecisionRecord {
                fleet_id: "linux-x64".to_string(),
                action: ScaleAction::Maintain,
                target: 1,
                current: 1,
                reason: "within threshold band".to_string(),
                pending_jobs: 0,
                decided_at: 1000,
            })
            .unwrap();

        store.clear_fleet_state("linux-x64").unwrap();

        assert!(store.list_workers_for_fleet("linux-x64").unwrap().is_empty());
        assert!(store.get_decision("linux-x64").unwrap().is_none());
        assert!(store.get_fleet_status("linux-x64").unwrap().is_none());
        assert!(store.get_fleet("linux-x64").unwrap().is_some());
    }

    #[test]
    fn on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runnergrid.redb");

        {
            let store = StateStore::open(&path).unwrap();
            store.put_fleet(&test_fleet("linux-x64")).unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert!(store.get_fleet("linux-x64").unwrap().is_some());
    }
}
