//! Session cookie middleware.
//!
//! Every API request is bound to a [`SessionId`]. A request without a valid
//! session cookie gets a fresh id, and the response carries the cookie that
//! binds the client to it. Cache directories and previews are scoped to this
//! id.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use tc_core::SessionId;

use crate::context::AppContext;

/// Resolve or issue the session and expose it as a request extension.
pub async fn session_middleware(
    State(ctx): State<AppContext>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let name = ctx.config.session.cookie_name.clone();

    let (session_id, issued) = match session_from_cookie(request.headers(), &name) {
        Some(id) => (id, false),
        None => (SessionId::new(), true),
    };

    ctx.sessions.see(session_id);
    request.extensions_mut().insert(session_id);

    let response = next.run(request).await;
    if !issued {
        return response;
    }

    tracing::debug!(session_id = %session_id, "Issued session cookie");
    let cookie = session_cookie(name, session_id, ctx.config.session.secure_cookie);
    (CookieJar::new().add(cookie), response).into_response()
}

/// Extract the session id from the request's cookies.
///
/// Returns `None` when the cookie is absent or does not hold a UUID.
pub fn session_from_cookie(headers: &HeaderMap, name: &str) -> Option<SessionId> {
    CookieJar::from_headers(headers)
        .get(name)
        .and_then(|cookie| cookie.value().trim_matches('"').parse().ok())
}

/// Build the cookie binding a client to `session_id`.
pub fn session_cookie(name: String, session_id: SessionId, secure: bool) -> Cookie<'static> {
    Cookie::build((name, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}
