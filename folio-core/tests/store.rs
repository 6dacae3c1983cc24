use std::collections::HashMap;

use chrono::Utc;
use folio_core::{
    AgentExecution, AgentName, AnalysisSummary, ExecutionStatus, JobInit, JobStore, JobStatus,
    StoreError,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn test_job() -> JobInit {
    JobInit {
        id: Uuid::now_v7(),
        owner: "user-42".to_string(),
        kind: "portfolio_analysis".to_string(),
        request_payload: json!({
            "positions": [
                { "symbol": "AAPL", "quantity": 10 },
                { "symbol": "MSFT", "quantity": 5 },
            ]
        }),
    }
}

fn test_summary() -> AnalysisSummary {
    let mut agent_executions = HashMap::new();
    agent_executions.insert(
        "analyzer".to_string(),
        AgentExecution {
            status: ExecutionStatus::Completed,
            started_at: Utc::now(),
            duration_seconds: 3.2,
            error: None,
        },
    );
    AnalysisSummary {
        total_duration_seconds: 3.2,
        completion_time: Utc::now(),
        agents_invoked: vec!["analyzer".to_string()],
        agent_executions,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn test_create_and_get_job(db: PgPool) {
    let store = JobStore::from_pool(db);
    let init = test_job();

    store.create_job(&init).await.expect("failed to create job");

    let job = store.get(init.id).await.expect("failed to get job");
    assert_eq!(job.id, init.id);
    assert_eq!(job.owner, init.owner);
    assert_eq!(job.kind, init.kind);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.request_payload, init.request_payload);
    assert!(job.started_at.is_none());
    assert!(job.completed_at.is_none());
    assert!(job.summary_payload.is_none());
    assert!(job.error_message.is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_get_unknown_job_is_not_found(db: PgPool) {
    let store = JobStore::from_pool(db);
    let missing = Uuid::now_v7();

    match store.get(missing).await {
        Err(StoreError::NotFound(id)) => assert_eq!(id, missing),
        other => panic!("expected NotFound, got {:?}", other.map(|j| j.status)),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn test_status_transitions_stamp_timestamps(db: PgPool) {
    let store = JobStore::from_pool(db);
    let init = test_job();
    store.create_job(&init).await.unwrap();

    let running = store
        .set_status(init.id, JobStatus::Running, None)
        .await
        .expect("pending -> running should be legal");
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());
    assert!(running.completed_at.is_none());

    let completed = store
        .set_status(init.id, JobStatus::Completed, None)
        .await
        .expect("running -> completed should be legal");
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.started_at, running.started_at);
    let completed_at = completed.completed_at.expect("completed_at must be set");
    assert!(completed.started_at.unwrap() <= completed_at);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_running_refresh_is_idempotent(db: PgPool) {
    let store = JobStore::from_pool(db);
    let init = test_job();
    store.create_job(&init).await.unwrap();

    let first = store
        .set_status(init.id, JobStatus::Running, None)
        .await
        .unwrap();
    // A redelivered message re-enters RUNNING; started_at must not move.
    let second = store
        .set_status(init.id, JobStatus::Running, None)
        .await
        .expect("running -> running refresh should be legal");
    assert_eq!(second.started_at, first.started_at);
    assert!(second.completed_at.is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_illegal_transitions_are_rejected(db: PgPool) {
    let store = JobStore::from_pool(db);
    let init = test_job();
    store.create_job(&init).await.unwrap();

    // A job cannot jump straight to a terminal state.
    match store.set_status(init.id, JobStatus::Completed, None).await {
        Err(StoreError::IllegalTransition { from, to, .. }) => {
            assert_eq!(from, JobStatus::Pending);
            assert_eq!(to, JobStatus::Completed);
        }
        other => panic!("expected IllegalTransition, got {:?}", other.map(|j| j.status)),
    }

    store
        .set_status(init.id, JobStatus::Running, None)
        .await
        .unwrap();
    store
        .set_status(init.id, JobStatus::Failed, Some("boom"))
        .await
        .unwrap();

    // Terminal is terminal: no transition out, not even to another terminal.
    for to in [JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
        assert!(matches!(
            store.set_status(init.id, to, None).await,
            Err(StoreError::IllegalTransition { .. })
        ));
    }

    let job = store.get(init.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("boom"));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_worker_payload_first_write_wins(db: PgPool) {
    let store = JobStore::from_pool(db);
    let init = test_job();
    store.create_job(&init).await.unwrap();

    let original = json!({ "verdict": "hold" });
    store
        .set_worker_payload(init.id, AgentName::Analyzer, &original)
        .await
        .unwrap();

    // A second write to a filled slot (e.g. on redelivery) is a no-op.
    store
        .set_worker_payload(init.id, AgentName::Analyzer, &json!({ "verdict": "sell" }))
        .await
        .unwrap();

    let job = store.get(init.id).await.unwrap();
    assert_eq!(job.worker_payload(AgentName::Analyzer), Some(&original));
    assert_eq!(job.worker_payload(AgentName::Visualizer), None);

    // Writes to distinct slots are independent.
    let charts = json!({ "charts": ["allocation.png"] });
    store
        .set_worker_payload(init.id, AgentName::Visualizer, &charts)
        .await
        .unwrap();
    let job = store.get(init.id).await.unwrap();
    assert_eq!(job.worker_payload(AgentName::Analyzer), Some(&original));
    assert_eq!(job.worker_payload(AgentName::Visualizer), Some(&charts));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_set_summary_round_trips(db: PgPool) {
    let store = JobStore::from_pool(db);
    let init = test_job();
    store.create_job(&init).await.unwrap();

    let summary = test_summary();
    store.set_summary(init.id, &summary).await.unwrap();

    let job = store.get(init.id).await.unwrap();
    let stored: AnalysisSummary =
        serde_json::from_value(job.summary_payload.expect("summary must be written")).unwrap();
    assert_eq!(stored, summary);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_instrument_reference_lookup(db: PgPool) {
    let store = JobStore::from_pool(db);

    let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
    store.register_instruments(&symbols).await.unwrap();
    // Registering again is a no-op, not an error.
    store.register_instruments(&symbols).await.unwrap();

    let queried = vec![
        "AAPL".to_string(),
        "MSFT".to_string(),
        "TSLA".to_string(),
    ];
    let known = store.known_instruments(&queried).await.unwrap();
    assert!(known.contains("AAPL"));
    assert!(known.contains("MSFT"));
    assert!(!known.contains("TSLA"));

    assert!(store.known_instruments(&[]).await.unwrap().is_empty());
}
