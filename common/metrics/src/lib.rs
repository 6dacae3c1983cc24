//! Prometheus plumbing for the orchestrator's HTTP surface.

use std::time::{Duration, Instant};

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram buckets sized to the service's own deadlines: sub-second bounds
/// for queue and store round trips, then doubling edges up to the larger of
/// the per-worker and overall job timeouts, so a slow invocation lands in a
/// real bucket instead of +Inf.
pub fn deadline_buckets(worker_timeout: Duration, job_timeout: Duration) -> Vec<f64> {
    let mut buckets = vec![0.01, 0.05, 0.1, 0.25, 0.5];
    let ceiling = worker_timeout
        .as_secs_f64()
        .max(job_timeout.as_secs_f64())
        .max(1.0);
    let mut edge = 1.0_f64;
    while edge < ceiling {
        buckets.push(edge);
        edge *= 2.0;
    }
    buckets.push(ceiling);
    buckets
}

/// Install the global recorder and expose it at `/metrics`, counting and
/// timing every HTTP request the router serves. Call once, last, after all
/// other routes are attached.
pub fn attach_metrics(router: Router, buckets: &[f64]) -> Router {
    let handle = install_recorder(buckets);

    router
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .layer(axum::middleware::from_fn(http_metrics))
}

pub fn install_recorder(buckets: &[f64]) -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets(buckets)
        .expect("bucket list must not be empty")
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

async fn http_metrics(request: Request<Body>, next: Next) -> impl IntoResponse {
    // Label by matched route, not the raw path, to keep cardinality bounded.
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let method = request.method().to_string();

    let timer = Instant::now();
    let response = next.run(request).await;

    let labels = [
        ("route", route),
        ("method", method),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_seconds", &labels)
        .record(timer.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_sorted_and_reach_the_deadline() {
        let buckets = deadline_buckets(Duration::from_secs(300), Duration::from_secs(900));

        assert!(buckets.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(buckets.last().copied(), Some(900.0));
        // The per-worker deadline has an edge at or above it well below the
        // job ceiling.
        assert!(buckets.iter().any(|edge| (300.0..900.0).contains(edge)));
    }

    #[test]
    fn test_buckets_handle_sub_second_deadlines() {
        let buckets = deadline_buckets(Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(buckets.last().copied(), Some(1.0));
        assert!(buckets.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
