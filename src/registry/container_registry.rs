use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::record::{ContainerKind, ContainerRecord, ContainerStatus, RecordFilter};
use super::store::{MemoryStore, RegistryStore};
use crate::container_management::runtime::ContainerRuntime;
use crate::error_handling::types::{RegistryError, StorageError};

/// Outcome of reconciling a freshly loaded registry against the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records kept as live.
    pub loaded: usize,
    /// Records whose container was gone or never started; marked failed and dropped.
    pub failed: usize,
    /// Terminal records left over from a previous run.
    pub purged: usize,
}

/// Authoritative store of container records.
///
/// All reads and writes go through one async lock, so every call sees a
/// consistent snapshot and updates are serialized. Every mutation is written
/// through to the store before the lock is released; if that write fails the
/// in-memory change is rolled back and the error returned.
pub struct Registry {
    records: Mutex<BTreeMap<String, ContainerRecord>>,
    store: Arc<dyn RegistryStore>,
}

impl Registry {
    /// Registry over `store` without reconciliation. Existing records are loaded as-is.
    pub fn new(store: Arc<dyn RegistryStore>) -> Result<Self, RegistryError> {
        let records = store
            .load()?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Ok(Self {
            records: Mutex::new(records),
            store,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Loads the registry and reconciles it with the engine.
    ///
    /// Previews whose container no longer runs (or never got one) are marked
    /// `Failed`, persisted, then deleted. Execution records can only be left
    /// over from a crash mid-run, so their containers are removed and the
    /// records dropped. If the engine cannot be queried for a record, the
    /// record is kept and left to the reaper.
    pub async fn open(
        store: Arc<dyn RegistryStore>,
        runtime: &dyn ContainerRuntime,
    ) -> Result<(Self, LoadReport), RegistryError> {
        let registry = Self::new(store)?;
        let mut report = LoadReport::default();

        for record in registry.list(None).await {
            if record.status.is_terminal() {
                if let Some(runtime_id) = &record.runtime_id {
                    if let Err(e) = runtime.remove(runtime_id).await {
                        warn!("Could not remove container of terminal record {}: {}", record.id, e);
                    }
                }
                registry.delete(&record.id).await?;
                report.purged += 1;
                continue;
            }

            let alive = match (&record.kind, &record.runtime_id) {
                (ContainerKind::Execution, _) => Some(false),
                (ContainerKind::Preview, None) => Some(false),
                (ContainerKind::Preview, Some(runtime_id)) => match runtime.inspect(runtime_id).await {
                    Ok(Some(state)) => Some(state.is_running()),
                    Ok(None) => Some(false),
                    Err(e) => {
                        warn!(
                            "Could not verify container of record {} ({}), keeping it: {}",
                            record.id, runtime_id, e
                        );
                        None
                    }
                },
            };

            match alive {
                Some(true) | None => report.loaded += 1,
                Some(false) => {
                    info!(
                        "Record {} ({:?}, {:?}) has no live container, marking failed",
                        record.id, record.kind, record.status
                    );
                    registry.set_status(&record.id, ContainerStatus::Failed).await?;
                    if let Some(runtime_id) = &record.runtime_id {
                        if let Err(e) = runtime.teardown(runtime_id, Duration::ZERO).await {
                            warn!("Could not remove container {} of record {}: {}", runtime_id, record.id, e);
                        }
                    }
                    registry.delete(&record.id).await?;
                    report.failed += 1;
                }
            }
        }

        info!(
            "Registry loaded: {} live, {} failed, {} purged",
            report.loaded, report.failed, report.purged
        );
        Ok((registry, report))
    }

    /// Persists the current map. Called with the lock held, so writes land in order.
    ///
    /// The save (serialize, fsync, rename) runs on the blocking pool.
    async fn persist(
        &self,
        records: &BTreeMap<String, ContainerRecord>,
    ) -> Result<(), RegistryError> {
        let list: Vec<ContainerRecord> = records.values().cloned().collect();
        let store = self.store.clone();
        let saved = tokio::task::spawn_blocking(move || store.save(&list))
            .await
            .unwrap_or_else(|e| Err(StorageError::WriteFailed(format!("save task failed: {}", e))));
        saved.map_err(|e| {
            error!("Failed to persist registry: {}", e);
            RegistryError::from(e)
        })
    }

    fn port_conflict(
        records: &BTreeMap<String, ContainerRecord>,
        id: &str,
        port: Option<u16>,
    ) -> Option<u16> {
        let port = port?;
        records
            .values()
            .any(|other| other.id != id && other.port == Some(port))
            .then_some(port)
    }

    pub async fn create(&self, record: ContainerRecord) -> Result<(), RegistryError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(RegistryError::DuplicateId(record.id));
        }
        if let Some(port) = Self::port_conflict(&records, &record.id, record.port) {
            return Err(RegistryError::PortInUse(port));
        }

        let id = record.id.clone();
        records.insert(id.clone(), record);
        if let Err(e) = self.persist(&records).await {
            records.remove(&id);
            return Err(e);
        }
        debug!("Registered record {}", id);
        Ok(())
    }

    /// Applies `mutate` to the record and returns the updated copy.
    ///
    /// `id` and `kind` cannot be changed; the status may only move forward.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<ContainerRecord, RegistryError>
    where
        F: FnOnce(&mut ContainerRecord),
    {
        let mut records = self.records.lock().await;
        let current = records
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let mut next = current.clone();
        mutate(&mut next);
        next.id = current.id.clone();
        next.kind = current.kind;

        if !current.status.can_transition_to(next.status) {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: next.status,
            });
        }
        if next.port != current.port {
            if let Some(port) = Self::port_conflict(&records, id, next.port) {
                return Err(RegistryError::PortInUse(port));
            }
        }

        records.insert(id.to_string(), next.clone());
        if let Err(e) = self.persist(&records).await {
            records.insert(id.to_string(), current);
            return Err(e);
        }
        if next.status != current.status {
            info!("Record {}: {:?} -> {:?}", id, current.status, next.status);
        }
        Ok(next)
    }

    pub async fn set_status(
        &self,
        id: &str,
        status: ContainerStatus,
    ) -> Result<ContainerRecord, RegistryError> {
        self.update(id, |record| record.status = status).await
    }

    pub async fn get(&self, id: &str) -> Option<ContainerRecord> {
        self.records.lock().await.get(id).cloned()
    }

    /// Records ordered by creation time.
    pub async fn list(&self, filter: Option<&RecordFilter>) -> Vec<ContainerRecord> {
        let records = self.records.lock().await;
        let mut matching: Vec<ContainerRecord> = records
            .values()
            .filter(|record| filter.map_or(true, |f| f.matches(record)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matching
    }

    /// Removes the record, returning it if it existed.
    pub async fn delete(&self, id: &str) -> Result<Option<ContainerRecord>, RegistryError> {
        let mut records = self.records.lock().await;
        let Some(removed) = records.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&records).await {
            records.insert(id.to_string(), removed);
            return Err(e);
        }
        debug!("Deleted record {}", id);
        Ok(Some(removed))
    }

    /// Ports held by any record. A port stays held until its record is deleted.
    pub async fn ports_in_use(&self) -> BTreeSet<u16> {
        self.records
            .lock()
            .await
            .values()
            .filter_map(|record| record.port)
            .collect()
    }

    /// The live preview owned by `session_id`, if any.
    pub async fn find_by_session(&self, session_id: &str) -> Option<ContainerRecord> {
        let filter = RecordFilter {
            kind: Some(ContainerKind::Preview),
            session_id: Some(session_id.to_string()),
            active_only: true,
            ..RecordFilter::default()
        };
        self.list(Some(&filter)).await.into_iter().next()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}
