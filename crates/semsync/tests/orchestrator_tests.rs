//! Job lifecycle tests: run a job end to end and check the job row, the
//! stored documents, and the event stream.

mod common;

use serde_json::json;

use common::harness::drain;
use common::{MockProvider, StaticCatalog, TestHarness};
use semsync::broadcast::JobEvent;
use semsync::jobs::{JobStatus, JobType, NewJob, TargetType};
use semsync::worker::{STEP_CANCELLED, STEP_COMPLETED};
use semsync::SemsyncError;

fn sales_catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_table("sales_db", "customers", "One row per customer account.")
        .with_table("sales_db", "orders", "Orders placed by customers.")
}

fn three_tables() -> StaticCatalog {
    sales_catalog().with_table("sales_db", "refunds", "Refunds issued against orders.")
}

fn full_sync() -> NewJob {
    NewJob::new(JobType::FullSync).partition("sales_db")
}

fn assert_well_formed(events: &[JobEvent]) {
    assert!(!events.is_empty(), "no events received");
    let (last, running) = events.split_last().unwrap();
    assert!(last.is_terminal(), "last event should be terminal: {:?}", last);
    for event in running {
        assert_eq!(event.status, JobStatus::Running, "unexpected {:?}", event);
    }
    for pair in events.windows(2) {
        if pair[1].status == JobStatus::Running {
            assert!(
                pair[1].progress >= pair[0].progress,
                "progress went backwards: {} -> {}",
                pair[0].progress,
                pair[1].progress
            );
        }
    }
    for event in running {
        assert!(event.progress < 1.0);
    }
}

#[tokio::test]
async fn test_full_sync_streams_progress() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    let mut rx = h.subscribe("sales_db");

    let job = h.run(full_sync()).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 1.0);
    assert_eq!(job.current_step.as_deref(), Some(STEP_COMPLETED));
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    let results = job.results.expect("results should be stored");
    assert_eq!(results.tables_synced, 2);
    assert_eq!(results.documents_embedded, 2);
    assert_eq!(results.documents_indexed, 2);
    assert!(results.errors.is_empty());

    let events = drain(&mut rx);
    assert_well_formed(&events);
    assert_eq!(events[0].current_step.as_deref(), Some("discover targets"));
    assert_eq!(events[0].progress, 0.0);
    assert!(events.iter().any(|e| e.progress == 0.5));
    let last = events.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.results.as_ref().unwrap().tables_synced, 2);

    let docs = h.documents("sales_db").await;
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d.is_indexed()));
    assert_eq!(
        docs.iter().map(|d| d.source_target.as_str()).collect::<Vec<_>>(),
        vec!["table:customers", "table:orders"]
    );
}

#[tokio::test]
async fn test_embedding_failure_fails_job_and_keeps_earlier_batches() {
    // Batch 2 fails on its first attempt and on the retry.
    let h = TestHarness::new(three_tables(), MockProvider::new().failing_calls(&[1, 2]));
    let mut rx = h.subscribe("sales_db");

    let job = h.run(full_sync()).await;

    assert_eq!(job.status, JobStatus::Failed);
    let message = job.error_message.expect("failed job should carry a message");
    assert!(message.contains("batch 2 of 3"), "got: {}", message);
    assert!(job
        .current_step
        .as_deref()
        .is_some_and(|s| s.starts_with("embed documents")));
    assert_eq!(h.provider.calls(), 3);

    let results = job.results.expect("partial results should be stored");
    assert_eq!(results.documents_built, 3);
    assert_eq!(results.documents_embedded, 1);
    assert_eq!(results.documents_indexed, 0);

    let docs = h.documents("sales_db").await;
    assert_eq!(docs.len(), 3);
    assert_eq!(docs.iter().filter(|d| d.embedding.is_some()).count(), 1);
    assert!(docs.iter().all(|d| d.indexed_at.is_none()));

    let events = drain(&mut rx);
    assert_well_formed(&events);
    let last = events.last().unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert!(last.error_message.is_some());
}

#[tokio::test]
async fn test_failed_batch_is_indexed_by_next_run() {
    let h = TestHarness::new(three_tables(), MockProvider::new().failing_calls(&[1, 2]));
    assert_eq!(h.run(full_sync()).await.status, JobStatus::Failed);

    let job = h
        .run(NewJob::new(JobType::Incremental).partition("sales_db"))
        .await;
    assert_eq!(job.status, JobStatus::Completed);

    // The embedded document is unchanged but was never indexed; the other
    // two never got a vector and are embedded again.
    let results = job.results.unwrap();
    assert_eq!(results.documents_unchanged, 1);
    assert_eq!(results.documents_built, 2);
    assert_eq!(results.documents_embedded, 2);
    assert_eq!(results.documents_indexed, 3);
    assert!(h.documents("sales_db").await.iter().all(|d| d.is_indexed()));

    // Full syncs re-embed everything.
    let job = h.run(full_sync()).await;
    let results = job.results.unwrap();
    assert_eq!(results.documents_built, 3);
    assert_eq!(results.documents_indexed, 3);
    assert!(h.documents("sales_db").await.iter().all(|d| d.is_indexed()));
}

#[tokio::test]
async fn test_cancel_during_embedding() {
    let (provider, gate) = MockProvider::new().gated_at(0);
    let h = TestHarness::new(three_tables(), provider);
    let mut rx = h.subscribe("sales_db");

    let job = h.orchestrator.create_job(&full_sync()).unwrap();
    let handle = h.orchestrator.spawn_job(&job.id);

    gate.reached.notified().await;
    let requested = h.orchestrator.cancel_job(&job.id).unwrap();
    assert_eq!(requested.status, JobStatus::Running);
    assert!(requested.cancel_requested);
    gate.release.notify_one();

    let job = handle.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.current_step.as_deref(), Some(STEP_CANCELLED));
    assert!(job.progress < 1.0);
    assert!(job.error_message.is_none());

    let results = job.results.unwrap();
    assert_eq!(results.documents_built, 3);
    assert_eq!(results.documents_embedded, 1);
    assert_eq!(results.documents_indexed, 0);

    // Phase 1-2 output survives; nothing reached the index.
    let docs = h.documents("sales_db").await;
    assert_eq!(docs.len(), 3);
    assert!(docs.iter().all(|d| !d.content.is_empty()));
    assert!(docs.iter().all(|d| d.indexed_at.is_none()));

    let events = drain(&mut rx);
    assert_well_formed(&events);
    assert_eq!(events.last().unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_incremental_skips_unchanged_documents() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    h.run(full_sync()).await;
    assert_eq!(h.provider.calls(), 2);

    let job = h
        .run(NewJob::new(JobType::Incremental).partition("sales_db"))
        .await;
    let results = job.results.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(results.tables_synced, 2);
    assert_eq!(results.documents_unchanged, 2);
    assert_eq!(results.documents_embedded, 0);
    assert_eq!(h.provider.calls(), 2);

    h.catalog
        .set_table("sales_db", "orders", "Orders placed by customers, one row per line item.");
    let job = h
        .run(NewJob::new(JobType::Incremental).partition("sales_db"))
        .await;
    let results = job.results.unwrap();
    assert_eq!(results.documents_built, 1);
    assert_eq!(results.documents_unchanged, 1);
    assert_eq!(results.documents_embedded, 1);
    assert!(h.provider.texts().last().unwrap().contains("line item"));
}

#[tokio::test]
async fn test_force_refresh_rebuilds_everything() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    h.run(full_sync()).await;

    let job = h
        .run(
            NewJob::new(JobType::Incremental)
                .partition("sales_db")
                .parameters(json!({"force_refresh": true})),
        )
        .await;
    let results = job.results.unwrap();
    assert_eq!(results.documents_built, 2);
    assert_eq!(results.documents_unchanged, 0);
    assert_eq!(h.provider.calls(), 4);
}

#[tokio::test]
async fn test_single_table() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());

    let job = h
        .run(
            NewJob::new(JobType::SingleTable)
                .partition("sales_db")
                .target(TargetType::Table, "orders"),
        )
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results.unwrap().tables_synced, 1);
    let docs = h.documents("sales_db").await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].key.resource_id, "orders");
}

#[tokio::test]
async fn test_single_table_not_found() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());

    let job = h
        .run(
            NewJob::new(JobType::SingleTable)
                .partition("sales_db")
                .target(TargetType::Table, "invoices"),
        )
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step.as_deref(), Some("discover targets"));
    let message = job.error_message.unwrap();
    assert!(message.contains("not found"), "got: {}", message);
    assert!(message.contains("invoices"));
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn test_bulk_regenerate_reembeds_stored_documents() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    h.run(full_sync()).await;

    // Source changes are ignored; the stored text is what gets embedded.
    h.catalog.set_table("sales_db", "orders", "changed upstream");
    let job = h
        .run(NewJob::new(JobType::BulkRegenerate).partition("sales_db"))
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    let results = job.results.unwrap();
    assert_eq!(results.documents_embedded, 2);
    assert_eq!(results.documents_indexed, 2);
    assert_eq!(results.documents_built, 0);
    assert_eq!(h.provider.calls(), 4);
    assert!(!h
        .provider
        .texts()
        .iter()
        .any(|t| t.contains("changed upstream")));
}

#[tokio::test]
async fn test_full_sync_prunes_removed_tables() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    h.run(full_sync()).await;

    h.catalog.remove_table("sales_db", "orders");
    let job = h.run(full_sync()).await;

    assert_eq!(job.results.unwrap().documents_pruned, 1);
    let docs = h.documents("sales_db").await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].key.resource_id, "customers");
}

#[tokio::test]
async fn test_target_load_failure_is_not_fatal() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    h.run(full_sync()).await;

    h.catalog.break_table("orders");
    let job = h.run(full_sync()).await;

    assert_eq!(job.status, JobStatus::Completed);
    let results = job.results.unwrap();
    assert_eq!(results.tables_synced, 1);
    assert_eq!(results.errors.len(), 1);
    assert!(results.errors[0].contains("orders"));
    // Documents of a target that failed to load are not pruned.
    assert_eq!(results.documents_pruned, 0);
    assert_eq!(h.documents("sales_db").await.len(), 2);
}

#[tokio::test]
async fn test_cross_partition_job_publishes_on_wildcard_key() {
    let catalog = sales_catalog().with_table("hr_db", "employees", "Staff directory.");
    let h = TestHarness::new(catalog, MockProvider::new());
    let mut all = h.subscribe("*");
    let mut sales = h.subscribe("sales_db");

    let job = h.run(NewJob::new(JobType::FullSync)).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.results.unwrap().tables_synced, 3);
    assert_eq!(h.documents("hr_db").await.len(), 1);
    assert_eq!(h.documents("sales_db").await.len(), 2);

    assert_well_formed(&drain(&mut all));
    assert!(drain(&mut sales).is_empty());
}

#[tokio::test]
async fn test_job_runs_at_most_once() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    let job = h.orchestrator.create_job(&full_sync()).unwrap();

    let (a, b) = tokio::join!(
        h.orchestrator.run_job(&job.id),
        h.orchestrator.run_job(&job.id)
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(SemsyncError::JobNotClaimable { .. }))));
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn test_recover_interrupted_jobs() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    let job = h.orchestrator.create_job(&full_sync()).unwrap();
    assert!(h.orchestrator.jobs().claim(&job.id, "discover targets").unwrap());

    assert_eq!(h.orchestrator.recover_interrupted().unwrap(), 1);

    let job = h.orchestrator.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.is_some());
    assert!(job.completed_at.is_some());
    assert!(matches!(
        h.orchestrator.run_job(&job.id).await,
        Err(SemsyncError::JobNotClaimable {
            status: JobStatus::Failed,
            ..
        })
    ));
}

/// Installs a trigger that rejects matching updates of the jobs table.
fn fail_job_updates(h: &TestHarness, when: &str) {
    let sql = format!(
        "CREATE TRIGGER jobs_offline BEFORE UPDATE ON jobs WHEN {}
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        when
    );
    h.orchestrator
        .jobs()
        .database()
        .with_conn(|conn| Ok(conn.execute_batch(&sql)?))
        .unwrap();
}

fn restore_job_updates(h: &TestHarness) {
    h.orchestrator
        .jobs()
        .database()
        .with_conn(|conn| Ok(conn.execute_batch("DROP TRIGGER jobs_offline;")?))
        .unwrap();
}

#[tokio::test]
async fn test_checkpoint_write_failure_fails_job_with_last_step() {
    let h = TestHarness::new(three_tables(), MockProvider::new());
    let mut rx = h.subscribe("sales_db");
    fail_job_updates(
        &h,
        "NEW.status = 'running' AND NEW.current_step = 'embed documents (batch 2 of 3)'",
    );

    let job = h.run(full_sync()).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.completed_at.is_some());
    assert_eq!(
        job.current_step.as_deref(),
        Some("embed documents (batch 2 of 3)")
    );
    let message = job.error_message.unwrap();
    assert!(message.contains("disk I/O error"), "got: {}", message);
    assert_eq!(job.results.unwrap().documents_embedded, 2);

    let events = drain(&mut rx);
    assert_well_formed(&events);
    assert_eq!(events.last().unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_unrecordable_outcome_still_publishes_failure() {
    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    let mut rx = h.subscribe("sales_db");
    let job = h.orchestrator.create_job(&full_sync()).unwrap();
    fail_job_updates(&h, "NEW.status <> 'running'");

    let result = h.orchestrator.run_job(&job.id).await;
    assert!(matches!(result, Err(SemsyncError::Database(_))));

    let events = drain(&mut rx);
    assert_well_formed(&events);
    let last = events.last().unwrap();
    assert_eq!(last.job_id, job.id);
    assert_eq!(last.status, JobStatus::Failed);
    assert!(last
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("could not be recorded")));

    // The row is stuck until recovery runs against a healthy database.
    assert_eq!(
        h.orchestrator.get_job(&job.id).unwrap().status,
        JobStatus::Running
    );
    restore_job_updates(&h);
    assert_eq!(h.orchestrator.recover_interrupted().unwrap(), 1);
    let job = h.orchestrator.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_unsubscribe_mid_job() {
    let (provider, gate) = MockProvider::new().gated_at(0);
    let h = TestHarness::new(sales_catalog(), provider);
    let mut rx = h.subscribe("sales_db");

    let job = h.orchestrator.create_job(&full_sync()).unwrap();
    let handle = h.orchestrator.spawn_job(&job.id);

    gate.reached.notified().await;
    assert!(h.orchestrator.unsubscribe("sales_db", rx.id()));
    gate.release.notify_one();

    let job = handle.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // Events queued before unsubscribing are still readable, then the
    // stream ends.
    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        seen.push(event);
    }
    assert!(rx.is_closed());
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|e| e.status == JobStatus::Running));
    assert!(!h.orchestrator.bus().has_subscribers("sales_db"));
}

#[tokio::test]
async fn test_list_jobs_by_status() {
    use semsync::jobs::JobQuery;

    let h = TestHarness::new(sales_catalog(), MockProvider::new());
    h.run(full_sync()).await;
    h.orchestrator
        .create_job(&NewJob::new(JobType::Incremental).partition("sales_db"))
        .unwrap();

    let pending = h
        .orchestrator
        .list_jobs(&JobQuery {
            status: Some(JobStatus::Pending),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(pending.total, 1);
    assert_eq!(pending.jobs[0].job_type, JobType::Incremental);

    let all = h.orchestrator.list_jobs(&JobQuery::default()).unwrap();
    assert_eq!(all.total, 2);
}
