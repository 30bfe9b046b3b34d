//! Saga state store
//!
//! Typed access to saga records over the key-value `StateStore`. Every write
//! is a read-modify-write under a per-saga async lock, so concurrent workers
//! serialise on the same record. Terminal records are immutable: later writes
//! are silently dropped, which is what makes duplicate deliveries harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::StateStore;
use crate::error::{Error, Result};

use super::record::{SagaPatch, SagaRecord, SagaStatus, StepRecord};

/// TTL for terminal records
pub const TERMINAL_TTL: Duration = Duration::from_secs(60 * 60);
/// TTL for in-flight records, comfortably past any saga deadline
pub const IN_FLIGHT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Typed saga persistence over a `StateStore`
#[derive(Clone)]
pub struct SagaStore {
    store: Arc<dyn StateStore>,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl SagaStore {
    /// Create a saga store over a state store backend
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        SagaStore {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn key(saga_id: Uuid) -> String {
        format!("saga:{}", saga_id)
    }

    async fn lock_for(&self, saga_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(saga_id).or_default().clone()
    }

    async fn drop_lock(&self, saga_id: Uuid) {
        self.locks.lock().await.remove(&saga_id);
    }

    async fn write(&self, record: &SagaRecord) -> Result<()> {
        let ttl = if record.is_terminal() {
            TERMINAL_TTL
        } else {
            IN_FLIGHT_TTL
        };
        let value = serde_json::to_value(record)?;
        self.store
            .put(&Self::key(record.saga_id), value, Some(ttl))
            .await
            .map_err(|e| Error::StateStore(e.to_string()))
    }

    /// Persist a fresh record
    pub async fn create(&self, record: &SagaRecord) -> Result<()> {
        let lock = self.lock_for(record.saga_id).await;
        let _guard = lock.lock().await;

        debug!("Creating saga {} for tenant {}", record.saga_id, record.tenant_id);
        self.write(record).await
    }

    /// Load a record (None after TTL expiry)
    pub async fn get(&self, saga_id: Uuid) -> Result<Option<SagaRecord>> {
        let value = self
            .store
            .get(&Self::key(saga_id))
            .await
            .map_err(|e| Error::StateStore(e.to_string()))?;
        match value {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial patch under the per-saga lock
    ///
    /// A patch against a terminal record is a no-op and returns the record as
    /// stored. Missing records fail with `NotFound`.
    pub async fn update(&self, saga_id: Uuid, patch: SagaPatch) -> Result<SagaRecord> {
        let lock = self.lock_for(saga_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .get(saga_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("saga {}", saga_id)))?;

        if record.is_terminal() {
            debug!("Ignoring patch against terminal saga {}", saga_id);
            return Ok(record);
        }

        patch.apply(&mut record);
        self.write(&record).await?;

        if record.is_terminal() {
            drop(_guard);
            self.drop_lock(saga_id).await;
        }
        Ok(record)
    }

    /// Mark the saga completed with its formatted response
    pub async fn complete(
        &self,
        saga_id: Uuid,
        formatted_response: impl Into<String>,
        step: Option<StepRecord>,
    ) -> Result<SagaRecord> {
        let mut patch = SagaPatch::new()
            .status(SagaStatus::Completed)
            .formatted_response(formatted_response)
            .clear_error();
        if let Some(step) = step {
            patch = patch.append_step(step);
        }

        info!("Saga {} completed", saga_id);
        self.update(saga_id, patch).await
    }

    /// Mark the saga failed
    ///
    /// The stored `error_message` leads with the machine-readable error kind.
    pub async fn fail(
        &self,
        saga_id: Uuid,
        error: &Error,
        step: Option<StepRecord>,
    ) -> Result<SagaRecord> {
        let mut patch = SagaPatch::new()
            .status(SagaStatus::Error)
            .error_message(error_message_for(error));
        if let Some(step) = step {
            patch = patch.append_step(step);
        }

        info!("Saga {} failed: {}", saga_id, error);
        self.update(saga_id, patch).await
    }
}

/// Render an error as the saga's user-visible `error_message`
fn error_message_for(error: &Error) -> String {
    let text = error.to_string();
    let kind = error.kind();
    if text.starts_with(kind) {
        text
    } else {
        format!("{}: {}", kind, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MemoryStateStore;
    use crate::saga::record::{StepMetadata, StepStatus};

    fn store() -> SagaStore {
        SagaStore::new(Arc::new(MemoryStateStore::new()))
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let store = store();
        let record = SagaRecord::new("acme", "top 5 customers");
        store.create(&record).await.unwrap();

        let loaded = store.get(record.saga_id).await.unwrap().unwrap();
        assert_eq!(loaded.tenant_id, "acme");
        assert_eq!(loaded.status, SagaStatus::Pending);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let store = store();
        let result = store.update(Uuid::new_v4(), SagaPatch::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_terminal_record_is_immutable() {
        let store = store();
        let record = SagaRecord::new("acme", "q");
        store.create(&record).await.unwrap();

        store
            .complete(record.saga_id, "all done", None)
            .await
            .unwrap();

        let after = store
            .update(
                record.saga_id,
                SagaPatch::new()
                    .status(SagaStatus::Generating)
                    .formatted_response("overwritten"),
            )
            .await
            .unwrap();

        assert_eq!(after.status, SagaStatus::Completed);
        assert_eq!(after.formatted_response.as_deref(), Some("all done"));
    }

    #[tokio::test]
    async fn test_fail_records_error_kind() {
        let store = store();
        let record = SagaRecord::new("acme", "q");
        store.create(&record).await.unwrap();

        store
            .fail(
                record.saga_id,
                &Error::UnsafeStatement("DELETE FROM orders".into()),
                None,
            )
            .await
            .unwrap();

        let loaded = store.get(record.saga_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SagaStatus::Error);
        assert!(loaded
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("UnsafeStatement"));
    }

    #[tokio::test]
    async fn test_call_stack_is_append_only_across_updates() {
        let store = store();
        let record = SagaRecord::new("acme", "q");
        store.create(&record).await.unwrap();

        for name in ["generate_query", "execute_query"] {
            store
                .update(
                    record.saga_id,
                    SagaPatch::new().append_step(StepRecord::new(
                        name,
                        StepStatus::Success,
                        10,
                        StepMetadata::default(),
                    )),
                )
                .await
                .unwrap();
        }

        let loaded = store.get(record.saga_id).await.unwrap().unwrap();
        assert_eq!(loaded.call_stack.len(), 2);
        assert_eq!(loaded.call_stack[0].step_name, "generate_query");
        assert_eq!(loaded.call_stack[1].step_name, "execute_query");
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialise() {
        let store = store();
        let record = SagaRecord::new("acme", "q");
        store.create(&record).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            let saga_id = record.saga_id;
            handles.push(tokio::spawn(async move {
                store
                    .update(
                        saga_id,
                        SagaPatch::new().append_step(StepRecord::new(
                            format!("step-{}", i),
                            StepStatus::Success,
                            1,
                            StepMetadata::default(),
                        )),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let loaded = store.get(record.saga_id).await.unwrap().unwrap();
        assert_eq!(loaded.call_stack.len(), 10);
    }
}
