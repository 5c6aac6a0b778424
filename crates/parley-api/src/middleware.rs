use axum::{extract::Request, middleware::Next, response::Response};

/// Header carrying the caller's user id, set by the hosting platform once it
/// has authenticated the request.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

/// Lift the platform-supplied user id into a `Caller` extension. Requests
/// without one pass through; handlers decide whether that is acceptable.
pub async fn identify(mut req: Request, next: Next) -> Response {
    let caller = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| Caller(v.to_string()));

    if let Some(caller) = caller {
        req.extensions_mut().insert(caller);
    }
    next.run(req).await
}
