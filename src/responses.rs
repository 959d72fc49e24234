//! Responses synthesized by the edge layer itself

use crate::models::{EdgeResponse, ResponseType};
use bytes::Bytes;
use http::StatusCode;

/// Header explaining why a protected image was refused
pub const PROTECTION_REASON_HEADER: &str = "x-protection-reason";

pub const DIRECT_NAVIGATION_REASON: &str = "Direct navigation blocked";
pub const POLICY_DENIED_REASON: &str = "Unauthorized access";

const DIRECT_NAVIGATION_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Access Denied</title>
  <style>
    body { font-family: sans-serif; text-align: center; padding: 4rem 1rem; color: #333; }
    h1 { color: #c0392b; }
  </style>
</head>
<body>
  <h1>Access Denied</h1>
  <p>Images on this site can only be viewed on the pages where they are published.</p>
  <p><a href="/">Return to the home page</a></p>
</body>
</html>
"#;

fn synthetic(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> EdgeResponse {
    EdgeResponse::new(status, body)
        .with_header("content-type", content_type)
        .with_header("cache-control", "no-store")
        .with_response_type(ResponseType::Synthetic)
}

/// 403 HTML page for someone opening a protected image URL directly
pub fn direct_navigation_blocked() -> EdgeResponse {
    synthetic(
        StatusCode::FORBIDDEN,
        "text/html; charset=utf-8",
        DIRECT_NAVIGATION_PAGE,
    )
    .with_header(PROTECTION_REASON_HEADER, DIRECT_NAVIGATION_REASON)
}

/// 403 plain-text refusal from the access policy
pub fn policy_denied() -> EdgeResponse {
    synthetic(StatusCode::FORBIDDEN, "text/plain; charset=utf-8", "Access denied")
        .with_header(PROTECTION_REASON_HEADER, POLICY_DENIED_REASON)
}

/// 503 JSON body for dynamic requests when the origin is unreachable
pub fn network_unavailable_json() -> EdgeResponse {
    let body = serde_json::json!({ "error": "Network unavailable" }).to_string();
    synthetic(StatusCode::SERVICE_UNAVAILABLE, "application/json", body)
}

/// 503 plain-text body for generic requests with nothing cached
pub fn offline_text() -> EdgeResponse {
    synthetic(
        StatusCode::SERVICE_UNAVAILABLE,
        "text/plain; charset=utf-8",
        "Offline - content not available",
    )
}

/// 404 with an empty body for image fetches that failed with no placeholder
pub fn image_not_found() -> EdgeResponse {
    EdgeResponse::new(StatusCode::NOT_FOUND, Bytes::new())
        .with_response_type(ResponseType::Synthetic)
}
