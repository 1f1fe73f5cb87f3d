//! HTTP plumbing shared by the services: correlation ids, API errors, health routes, logging
//! and shutdown.
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use health::HealthRegistry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

mod config;
mod correlation;
mod error;

pub use config::{EnvMsDuration, NonEmptyString, ParseEnvMsDurationError, StringIsEmptyError};
pub use correlation::correlation;
pub use error::{ApiError, DatabaseError, ErrorBody};

/// Add `/`, `/_readiness` and `/_liveness`. Without a registry, liveness only checks that axum
/// answers.
pub fn add_health_routes(
    router: Router,
    name: &'static str,
    liveness: Option<HealthRegistry>,
) -> Router {
    let index = move || std::future::ready(name);
    let router = router
        .route("/", get(index))
        .route("/_readiness", get(index));

    match liveness {
        Some(registry) => router.route(
            "/_liveness",
            get(move || std::future::ready(registry.get_status())),
        ),
        None => router.route("/_liveness", get(index)),
    }
}

/// Wrap every route with the request limits, request tracing and the correlation middleware.
pub fn add_service_layers(router: Router, max_body_size: usize, concurrency_limit: usize) -> Router {
    router
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(correlation))
}

/// Log to stdout, filtered by `RUST_LOG` (default `info`), as JSON lines when `json` is set.
pub fn init_tracing(json: bool) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_layer = if json {
        fmt::layer()
            .with_target(true)
            .json()
            .with_filter(filter())
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_filter(filter())
            .boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

/// Cancel `token` on SIGTERM or SIGINT.
pub fn install_shutdown_handler(token: CancellationToken) -> anyhow::Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to register SIGTERM handler")?;
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("failed to register SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = term.recv() => {},
            _ = interrupt.recv() => {},
        };

        tracing::info!("Shutting down gracefully...");
        token.cancel();
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn index_and_readiness() {
        let app = add_health_routes(Router::new(), "order-service", None);

        for uri in ["/", "/_readiness", "/_liveness"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"order-service");
        }
    }

    #[tokio::test]
    async fn liveness_follows_registry() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("propagator", Duration::from_secs(30)).await;
        let app = add_health_routes(Router::new(), "product-service", Some(registry));

        let status = |app: Router| async move {
            app.oneshot(
                Request::builder()
                    .uri("/_liveness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
        };

        assert_eq!(status(app.clone()).await, StatusCode::INTERNAL_SERVER_ERROR);

        handle.report_healthy().await;
        let mut healthy = false;
        for _ in 0..50 {
            if status(app.clone()).await == StatusCode::OK {
                healthy = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(healthy);
    }
}
