use std::{future::ready, sync::Arc};

use axum::{routing::get, Router};
use common_metrics::{attach_metrics, deadline_buckets};
use envconfig::Envconfig;
use folio_orchestrator::{config::Config, consumer, context::AppContext};
use health::HealthRegistry;
use tracing::{error, info};

pub fn app(liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
}

async fn index() -> &'static str {
    "folio orchestrator"
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("failed to load configuration from env");
    tracing_subscriber::fmt::init();

    let liveness = HealthRegistry::new("liveness");

    let (app_config, store_pool, queue_pool) = config.to_components();
    let bind = app_config.bind();

    info!("orchestrator starting, listening at {}", bind);

    let consumer_liveness = liveness
        .register("consumer".to_string(), app_config.poll_interval * 4)
        .await;

    let app = attach_metrics(
        app(liveness),
        &deadline_buckets(app_config.worker_timeout, app_config.orchestrator_timeout),
    );

    let context = AppContext::create(app_config, store_pool, queue_pool, consumer_liveness)
        .await
        .expect("failed to create app context");

    let http_server = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(bind).await?;
        axum::serve(listener, app).await
    });

    let consumer_loop = tokio::spawn(consumer::run(Arc::new(context)));

    tokio::select! {
        res = consumer_loop => {
            error!("consumer loop exited");
            if let Ok(Err(e)) = res {
                error!("consumer failed with: {}", e)
            }
        }
        res = http_server => {
            error!("http server exited");
            if let Ok(Err(e)) = res {
                error!("server failed with: {}", e)
            }
        }
    }

    info!("exiting");
}
