//! One reconciliation pass over one collection.

use crate::context::{log_failure, SyncContext};
use crate::error::Result;
use fitsync_engine::{
    reconcile, CollectionKind, DeleteResult, PassReport, ReconcilePlan, UpsertResult, UpsertStep,
};
use futures::future::join_all;
use std::time::Instant;

/// Run a pass: deletions first, then creates and updates.
///
/// Every remote call in a phase runs concurrently and fails independently.
/// Each write sends the record as it is when its turn comes, not as it was
/// when the plan was built, and records that were synced or deleted in the
/// meantime are skipped. Results are folded into the store in one batch
/// after all calls resolved, and the collection is persisted once.
pub async fn run_pass(ctx: &SyncContext, kind: CollectionKind) -> Result<PassReport> {
    let started = Instant::now();
    let plan = {
        let store = ctx.store.lock();
        if store.owner_id().is_none() {
            return Ok(PassReport {
                collection: Some(kind),
                ..PassReport::default()
            });
        }
        ReconcilePlan::build(&store, kind)
    };

    if plan.is_empty() {
        tracing::trace!(collection = %kind, "nothing to reconcile");
        return Ok(PassReport {
            collection: Some(kind),
            ..PassReport::default()
        });
    }

    tracing::debug!(
        collection = %kind,
        deletions = plan.deletions.len(),
        upserts = plan.upserts.len(),
        "reconcile pass started"
    );

    let deletes = join_all(plan.deletions.iter().map(|task| async move {
        DeleteResult {
            id: task.id.clone(),
            result: ctx.delete_remote(kind, &task.id).await,
        }
    }))
    .await;

    let upserts: Vec<UpsertResult> = join_all(plan.upserts.iter().map(|task| async move {
        let attempt = ctx.write_pending(kind, &task.id, UpsertStep::Update).await?;
        Some(UpsertResult {
            id: task.id.clone(),
            revision: attempt.revision,
            result: attempt.result,
            calls: attempt.calls,
        })
    }))
    .await
    .into_iter()
    .flatten()
    .collect();

    for delete in &deletes {
        if let Err(failure) = &delete.result {
            log_failure(kind, &delete.id, failure.class(), "delete");
        }
    }
    for upsert in &upserts {
        if let Err(failure) = &upsert.result {
            log_failure(kind, &upsert.id, failure.class(), "upsert");
        }
    }

    let report = {
        let mut store = ctx.store.lock();
        reconcile::commit(&mut store, kind, deletes, upserts)
    };

    if !report.purged.is_empty() || !report.confirmed.is_empty() {
        ctx.persist_collection(kind).await?;
    }

    tracing::debug!(
        collection = %kind,
        purged = report.purged.len(),
        confirmed = report.confirmed.len(),
        superseded = report.superseded.len(),
        failed = report.failed.len() + report.retained.len(),
        remote_calls = report.remote_calls,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "reconcile pass finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::persistence::MemoryKv;
    use crate::remote::{MemoryRemote, RemoteOp};
    use fitsync_engine::{FailureClass, Mutation, RemoteFailure};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<SyncContext>, Arc<MemoryRemote>) {
        let remote = Arc::new(MemoryRemote::new());
        let ctx = SyncContext::new(
            SyncConfig::default(),
            remote.clone(),
            Arc::new(MemoryKv::new()),
        );
        ctx.store.lock().set_owner(Some("u1".into()));
        (ctx, remote)
    }

    fn add_entry(ctx: &SyncContext, id: &str) {
        ctx.store
            .lock()
            .apply(
                Mutation::insert(
                    id,
                    CollectionKind::NutritionEntries,
                    "u1",
                    json!({"name": "Oats", "calories": 150, "protein": 5, "carbs": 27, "fats": 3}),
                ),
                1000,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn creates_then_goes_quiet() {
        let (ctx, remote) = setup();
        add_entry(&ctx, "n-1");
        add_entry(&ctx, "n-2");

        let report = run_pass(&ctx, CollectionKind::NutritionEntries).await.unwrap();
        assert_eq!(report.confirmed, vec!["n-1".to_string(), "n-2".to_string()]);
        // update misses, create lands
        assert_eq!(report.remote_calls, 4);
        assert_eq!(remote.records(CollectionKind::NutritionEntries).len(), 2);

        remote.clear_calls();
        let again = run_pass(&ctx, CollectionKind::NutritionEntries).await.unwrap();
        assert_eq!(again.remote_calls, 0);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_batch() {
        let (ctx, remote) = setup();
        add_entry(&ctx, "n-1");
        add_entry(&ctx, "n-2");
        remote.fail_always(
            RemoteOp::Update,
            Some("n-1"),
            RemoteFailure::Transient("timeout".into()),
        );

        let report = run_pass(&ctx, CollectionKind::NutritionEntries).await.unwrap();
        assert_eq!(report.confirmed, vec!["n-2".to_string()]);
        assert_eq!(
            report.failed,
            vec![("n-1".to_string(), FailureClass::Transient)]
        );

        let store = ctx.store.lock();
        assert!(!store.get(CollectionKind::NutritionEntries, "n-1").unwrap().synced);
    }

    #[tokio::test]
    async fn persists_after_confirming() {
        let (ctx, _remote) = setup();
        add_entry(&ctx, "n-1");
        run_pass(&ctx, CollectionKind::NutritionEntries).await.unwrap();

        let saved = ctx
            .persistence
            .load_collection("u1", CollectionKind::NutritionEntries)
            .await
            .unwrap()
            .unwrap();
        assert!(saved.records["n-1"].synced);
    }

    #[tokio::test]
    async fn no_owner_no_calls() {
        let (ctx, remote) = setup();
        ctx.store.lock().set_owner(None);
        let report = run_pass(&ctx, CollectionKind::Workouts).await.unwrap();
        assert!(report.is_clean());
        assert!(remote.calls().is_empty());
    }
}
