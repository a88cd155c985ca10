use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

/// Generate a request correlation ID (32 hex chars).
pub fn generate_request_id() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// Axum middleware that threads an `x-request-id` header through every
/// request and wraps handling in a span carrying it. An incoming header is
/// reused so upstream proxies keep their correlation.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id);

    if let Ok(value) = request_id.parse() {
        request.headers_mut().insert("x-request-id", value);
    }

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let _guard = span.enter();

    let mut response = next.run(request).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_32_hex() {
        let id = generate_request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
