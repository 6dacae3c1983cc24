use std::sync::Arc;

use folio_core::{JobStore, PoolConfig, WorkQueue};
use health::HealthHandle;

use crate::config::AppConfig;
use crate::invoker::AgentInvoker;
use crate::orchestrator::OrchestratorError;

pub struct AppContext {
    pub store: JobStore,
    pub queue: WorkQueue,
    pub invoker: Arc<AgentInvoker>,
    pub liveness: HealthHandle,
    pub config: AppConfig,
}

impl AppContext {
    pub async fn create(
        config: AppConfig,
        store_pool: PoolConfig,
        queue_pool: PoolConfig,
        liveness: HealthHandle,
    ) -> Result<Self, OrchestratorError> {
        let store = JobStore::new(&store_pool, config.store_retry.clone()).await?;
        let queue = WorkQueue::new(
            &queue_pool,
            config.queue_visibility_timeout,
            config.queue_max_receives,
        )
        .await?;
        let invoker =
            AgentInvoker::new(config.endpoints.clone(), config.worker_timeout).map_err(|error| {
                OrchestratorError::Startup(format!("failed to create agent client: {}", error))
            })?;

        Ok(Self {
            store,
            queue,
            invoker: Arc::new(invoker),
            liveness,
            config,
        })
    }
}
