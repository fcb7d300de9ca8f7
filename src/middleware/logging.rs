//! Request logging middleware.
//!
//! Logs every HTTP request with method, path, status code, and latency.
//! Endpoints the render loop polls several times a second log at DEBUG.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Paths hit on every playback tick.
fn is_polled(path: &str) -> bool {
    path == "/api/buffer/status"
        || path == "/api/sync/latest"
        || path.ends_with("/prefetch")
        || (path.starts_with("/api/sessions/")
            && !path.ends_with("/command")
            && !path.ends_with("/dataset"))
}

/// Logs method, path, status and latency; WARN for 5xx, skips `/health`.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(method = %method, path = %path, status, latency_ms, "Request failed (5xx)");
    } else if status >= 400 {
        info!(method = %method, path = %path, status, latency_ms, "Request rejected (4xx)");
    } else if is_polled(&path) {
        debug!(method = %method, path = %path, status, latency_ms, "Request completed");
    } else {
        info!(method = %method, path = %path, status, latency_ms, "Request completed");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polled_paths() {
        assert!(is_polled("/api/buffer/status"));
        assert!(is_polled("/api/datasets/a.csv/prefetch"));
        assert!(is_polled("/api/sessions/0b6f3c1e-7f0e-4a7b-9a1e-2d3c4b5a6f70"));
        assert!(!is_polled("/api/sessions/0b6f3c1e-7f0e-4a7b-9a1e-2d3c4b5a6f70/command"));
        assert!(!is_polled("/api/datasets/a.csv/chunk"));
    }
}
