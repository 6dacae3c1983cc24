use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use folio_core::{
    AgentName, JobInit, JobStore, StoreRetryPolicy, SubmissionEnvelope, WorkQueue,
};
use folio_orchestrator::{config::AppConfig, context::AppContext, invoker::AgentInvoker};
use httpmock::{Method, Mock, MockServer};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

pub const OWNER: &str = "user-1";
pub const KIND: &str = "portfolio_analysis";

pub fn agent_endpoints(server: &MockServer) -> HashMap<AgentName, String> {
    AgentName::ALL
        .iter()
        .map(|&agent| (agent, server.url(format!("/{}", agent))))
        .collect()
}

pub async fn get_test_context(db: PgPool, server: &MockServer) -> Arc<AppContext> {
    get_test_context_with_timeouts(
        db,
        server,
        Duration::from_secs(10),
        Duration::from_secs(30),
    )
    .await
}

pub async fn get_test_context_with_timeouts(
    db: PgPool,
    server: &MockServer,
    worker_timeout: Duration,
    orchestrator_timeout: Duration,
) -> Arc<AppContext> {
    let config = AppConfig {
        host: "localhost".to_string(),
        port: 0,
        endpoints: agent_endpoints(server),
        worker_timeout,
        orchestrator_timeout,
        queue_visibility_timeout: Duration::from_secs(910),
        queue_max_receives: 3,
        store_retry: StoreRetryPolicy::default(),
        poll_interval: Duration::from_millis(100),
        dead_letter_sweep_interval: Duration::from_secs(60),
        max_concurrent_jobs: 4,
    };

    let store = JobStore::from_pool(db.clone());
    let queue = WorkQueue::from_pool(
        db,
        config.queue_visibility_timeout,
        config.queue_max_receives,
    );
    let invoker = AgentInvoker::new(config.endpoints.clone(), config.worker_timeout)
        .expect("failed to build invoker");

    let registry = health::HealthRegistry::new("test");
    let liveness = registry
        .register("test".to_string(), Duration::from_secs(30))
        .await;

    Arc::new(AppContext {
        store,
        queue,
        invoker: Arc::new(invoker),
        liveness,
        config,
    })
}

pub fn portfolio_request(symbols: &[&str]) -> Value {
    let positions: Vec<Value> = symbols
        .iter()
        .map(|symbol| json!({ "symbol": symbol, "quantity": 1 }))
        .collect();
    json!({ "positions": positions })
}

/// Create a PENDING job and enqueue its submission envelope, the way the
/// external submitter does.
pub async fn submit_job(context: &AppContext, request_payload: Value) -> Uuid {
    let init = JobInit {
        id: Uuid::now_v7(),
        owner: OWNER.to_string(),
        kind: KIND.to_string(),
        request_payload,
    };
    context
        .store
        .create_job(&init)
        .await
        .expect("failed to create job");
    context
        .queue
        .enqueue(&SubmissionEnvelope { job_id: init.id })
        .await
        .expect("failed to enqueue envelope");
    init.id
}

pub async fn receive_one(context: &AppContext) -> folio_core::Delivery {
    context
        .queue
        .receive()
        .await
        .expect("failed to receive")
        .expect("expected a delivery on the queue")
}

pub fn mock_agent_success<'a>(server: &'a MockServer, agent: AgentName, body: &str) -> Mock<'a> {
    let body = body.to_string();
    server.mock(move |when, then| {
        when.method(Method::POST).path(format!("/{}", agent));
        then.status(200)
            .json_body(json!({ "statusCode": 200, "body": body }));
    })
}

pub fn mock_agent_failure<'a>(server: &'a MockServer, agent: AgentName, message: &str) -> Mock<'a> {
    let message = message.to_string();
    server.mock(move |when, then| {
        when.method(Method::POST).path(format!("/{}", agent));
        then.status(200)
            .json_body(json!({ "statusCode": 500, "body": message }));
    })
}

pub fn mock_agent_hang<'a>(server: &'a MockServer, agent: AgentName) -> Mock<'a> {
    server.mock(move |when, then| {
        when.method(Method::POST).path(format!("/{}", agent));
        then.status(200)
            .delay(Duration::from_secs(60))
            .json_body(json!({ "statusCode": 200, "body": "too late" }));
    })
}
