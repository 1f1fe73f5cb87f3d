use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use common_channel::{CorrelationId, CORRELATION_ID_HTTP_HEADER};
use tracing::{info_span, Instrument};

/// Tag the request with a correlation id, reusing the caller's `X-Correlation-ID` when present.
///
/// The id is stored in the request extensions for handlers (`Extension<CorrelationId>`), set on
/// a span wrapping the rest of the request, and echoed back in the response headers.
pub async fn correlation(mut req: Request<Body>, next: Next) -> Response {
    let upstream = req
        .headers()
        .get(CORRELATION_ID_HTTP_HEADER)
        .and_then(|value| value.to_str().ok());
    let correlation_id = CorrelationId::from_upstream(upstream);

    let span = info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    req.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HTTP_HEADER, value);
    }
    response
}
