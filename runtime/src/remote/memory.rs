//! In-memory remote store.
//!
//! Used by tests and demos. Failures can be scripted per operation and
//! record, and every call is logged.

use super::RemoteStore;
use async_trait::async_trait;
use dashmap::DashMap;
use fitsync_engine::{CollectionKind, RecordId, RemoteFailure, RemoteRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Remote operation kinds, for scripting and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Update,
    Delete,
    List,
}

/// One logged call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub collection: CollectionKind,
    pub id: Option<RecordId>,
    pub succeeded: bool,
}

#[derive(Debug)]
struct FailureRule {
    op: RemoteOp,
    id: Option<RecordId>,
    failure: RemoteFailure,
    remaining: usize,
}

/// Remote store held in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    records: DashMap<(CollectionKind, RecordId), RemoteRecord>,
    rules: Mutex<Vec<FailureRule>>,
    calls: Mutex<Vec<RemoteCall>>,
    offline: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` matching calls. `id` of `None` matches any record.
    pub fn fail_times(
        &self,
        op: RemoteOp,
        id: Option<&str>,
        failure: RemoteFailure,
        times: usize,
    ) {
        self.rules.lock().push(FailureRule {
            op,
            id: id.map(str::to_string),
            failure,
            remaining: times,
        });
    }

    /// Fail the next matching call.
    pub fn fail_next(&self, op: RemoteOp, id: Option<&str>, failure: RemoteFailure) {
        self.fail_times(op, id, failure, 1);
    }

    /// Fail every matching call until [`MemoryRemote::clear_failures`].
    pub fn fail_always(&self, op: RemoteOp, id: Option<&str>, failure: RemoteFailure) {
        self.fail_times(op, id, failure, usize::MAX);
    }

    pub fn clear_failures(&self) {
        self.rules.lock().clear();
    }

    /// Make every call fail as a transient network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Add a record out of band.
    pub fn seed(&self, record: RemoteRecord) {
        self.records
            .insert((record.collection, record.id.clone()), record);
    }

    /// Remove a record out of band.
    pub fn remove(&self, collection: CollectionKind, id: &str) -> Option<RemoteRecord> {
        self.records
            .remove(&(collection, id.to_string()))
            .map(|(_, record)| record)
    }

    pub fn record(&self, collection: CollectionKind, id: &str) -> Option<RemoteRecord> {
        self.records
            .get(&(collection, id.to_string()))
            .map(|r| r.value().clone())
    }

    /// Records in a collection, sorted by id.
    pub fn records(&self, collection: CollectionKind) -> Vec<RemoteRecord> {
        let mut records: Vec<RemoteRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Number of logged calls of one kind.
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn scripted_failure(&self, op: RemoteOp, id: Option<&str>) -> Option<RemoteFailure> {
        if self.offline.load(Ordering::SeqCst) {
            return Some(RemoteFailure::Transient("offline".into()));
        }

        let mut rules = self.rules.lock();
        let position = rules.iter().position(|rule| {
            rule.op == op && rule.remaining > 0 && (rule.id.is_none() || rule.id.as_deref() == id)
        })?;
        let rule = &mut rules[position];
        rule.remaining -= 1;
        let failure = rule.failure.clone();
        if rule.remaining == 0 {
            rules.remove(position);
        }
        Some(failure)
    }

    fn log(&self, op: RemoteOp, collection: CollectionKind, id: Option<&str>, succeeded: bool) {
        self.calls.lock().push(RemoteCall {
            op,
            collection,
            id: id.map(str::to_string),
            succeeded,
        });
    }

    /// Run one call. Yields first so concurrent callers interleave.
    async fn call<T>(
        &self,
        op: RemoteOp,
        collection: CollectionKind,
        id: Option<&str>,
        apply: impl FnOnce() -> Result<T, RemoteFailure>,
    ) -> Result<T, RemoteFailure> {
        tokio::task::yield_now().await;

        let result = match self.scripted_failure(op, id) {
            Some(failure) => Err(failure),
            None => apply(),
        };
        self.log(op, collection, id, result.is_ok());
        result
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn create(&self, record: &RemoteRecord) -> Result<RemoteRecord, RemoteFailure> {
        self.call(RemoteOp::Create, record.collection, Some(&record.id), || {
            let key = (record.collection, record.id.clone());
            if self.records.contains_key(&key) {
                return Err(RemoteFailure::ConditionFailed);
            }
            self.records.insert(key, record.clone());
            Ok(record.clone())
        })
        .await
    }

    async fn update(&self, record: &RemoteRecord) -> Result<RemoteRecord, RemoteFailure> {
        self.call(RemoteOp::Update, record.collection, Some(&record.id), || {
            match self.records.get_mut(&(record.collection, record.id.clone())) {
                Some(mut existing) => {
                    *existing = record.clone();
                    Ok(record.clone())
                }
                None => Err(RemoteFailure::ConditionFailed),
            }
        })
        .await
    }

    async fn delete(&self, collection: CollectionKind, id: &str) -> Result<(), RemoteFailure> {
        self.call(RemoteOp::Delete, collection, Some(id), || {
            match self.records.remove(&(collection, id.to_string())) {
                Some(_) => Ok(()),
                None => Err(RemoteFailure::NotFound),
            }
        })
        .await
    }

    async fn list(
        &self,
        collection: CollectionKind,
        owner_id: &str,
    ) -> Result<Vec<RemoteRecord>, RemoteFailure> {
        self.call(RemoteOp::List, collection, None, || {
            Ok(self
                .records(collection)
                .into_iter()
                .filter(|r| r.owner_id == owner_id)
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{delete_record, write_record};
    use fitsync_engine::UpsertStep;
    use serde_json::json;

    fn banana() -> RemoteRecord {
        RemoteRecord {
            id: "n-1".into(),
            owner_id: "owner-1".into(),
            collection: CollectionKind::NutritionEntries,
            fields: json!({"name": "Banana", "calories": 105, "protein": 1, "carbs": 27, "fats": 0}),
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[tokio::test]
    async fn conditions() {
        let remote = MemoryRemote::new();
        assert_eq!(
            remote.update(&banana()).await,
            Err(RemoteFailure::ConditionFailed)
        );
        assert!(remote.create(&banana()).await.is_ok());
        assert_eq!(
            remote.create(&banana()).await,
            Err(RemoteFailure::ConditionFailed)
        );
        assert!(remote.delete(CollectionKind::NutritionEntries, "n-1").await.is_ok());
        assert_eq!(
            remote.delete(CollectionKind::NutritionEntries, "n-1").await,
            Err(RemoteFailure::NotFound)
        );
    }

    #[tokio::test]
    async fn write_falls_back_to_create() {
        let remote = MemoryRemote::new();
        let (result, calls) = write_record(&remote, &banana(), UpsertStep::Update).await;
        assert!(result.is_ok());
        assert_eq!(calls, 2);
        assert!(remote.record(CollectionKind::NutritionEntries, "n-1").is_some());

        let ops: Vec<RemoteOp> = remote.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![RemoteOp::Update, RemoteOp::Create]);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed() {
        let remote = MemoryRemote::new();
        remote.fail_times(
            RemoteOp::Create,
            Some("n-1"),
            RemoteFailure::Transient("timeout".into()),
            2,
        );

        for _ in 0..2 {
            let (result, _) = write_record(&remote, &banana(), UpsertStep::Create).await;
            assert_eq!(result, Err(RemoteFailure::Transient("timeout".into())));
        }
        let (result, _) = write_record(&remote, &banana(), UpsertStep::Create).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn delete_treats_missing_as_success() {
        let remote = MemoryRemote::new();
        assert!(delete_record(&remote, CollectionKind::Workouts, "w-1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn offline_fails_everything() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        assert!(matches!(
            remote.list(CollectionKind::Workouts, "owner-1").await,
            Err(RemoteFailure::Transient(_))
        ));
        assert_eq!(remote.call_count(RemoteOp::List), 1);
    }
}
