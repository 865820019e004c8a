//! Gate middleware
//!
//! Applied with `axum::middleware::from_fn_with_state`. Admitted requests
//! carry a [`CorrelationId`] extension and run inside a span tagged with
//! it; the same ID is echoed in the `x-request-id` response header.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use super::RequestGate;
use crate::error::AppError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CLIENT_ID_HEADER: &str = "x-client-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Rate-limit key for a request
pub fn client_key(request: &Request) -> String {
    let headers = request.headers();

    if let Some(id) = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return format!("client:{id}");
    }

    if let Some(hop) = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return format!("ip:{hop}");
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }

    "anonymous".to_string()
}

pub async fn request_gate(
    State(gate): State<RequestGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);

    let correlation_id = match gate.admit(&key) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(
                client = %key,
                path = %request.uri().path(),
                retry_after = e.retry_after_secs(),
                "Rate limit exceeded"
            );
            return AppError::from(e).into_response();
        }
    };

    request.extensions_mut().insert(correlation_id.clone());

    let span = tracing::info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path()
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
