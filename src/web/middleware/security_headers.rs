use axum::{
    body::Body as AxumBody,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};

/// Attached to every response, error responses included. Values are
/// kept byte-for-byte stable for client compatibility.
pub async fn security_headers(req: Request<AxumBody>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    response
}
