use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Bind `bind` and serve `router` until `shutdown` resolves.
pub async fn serve<F>(router: Router, bind: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Add the prometheus endpoint and the request tracking middleware. Call last, once per process:
/// the recorder is global.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Middleware recording request count and latency per matched route.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}

pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    metrics::counter!(name, labels).increment(value);
}

pub fn histogram(name: &'static str, labels: &[(String, String)], value: f64) {
    metrics::histogram!(name, labels).record(value);
}

/// Records the milliseconds between creation and drop into a histogram.
pub struct TimingGuard<'a> {
    name: &'static str,
    labels: &'a [(String, String)],
    start: Instant,
}

pub fn timing_guard<'a>(name: &'static str, labels: &'a [(String, String)]) -> TimingGuard<'a> {
    TimingGuard {
        name,
        labels,
        start: Instant::now(),
    }
}

impl TimingGuard<'_> {
    // Drops the guard, recording now.
    pub fn fin(self) {}
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        metrics::histogram!(self.name, self.labels).record(self.start.elapsed().as_millis() as f64);
    }
}
