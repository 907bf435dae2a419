//! HTTP Basic auth in front of the protected routes
//!
//! Temp-link consumption and the home page stay open; everything that browses
//! or mints is gated when credentials are configured.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use subtle::ConstantTimeEq;

use crate::config::Credentials;

/// Path prefixes that require credentials
pub const PROTECTED_PREFIXES: &[&str] = &["/download/", "/gettemplink/", "/walk/", "/favicon.ico"];

const REALM: &str = r#"Basic realm="simplefileserver""#;

/// Whether a request path should be protected by auth
pub fn is_protected_path(path: &str) -> bool {
    PROTECTED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

/// Compare both halves in constant time, without short-circuiting on the username
fn credentials_match(auth: &Authorization<Basic>, credentials: &Credentials) -> bool {
    let user_ok = auth
        .username()
        .as_bytes()
        .ct_eq(credentials.username.as_bytes());
    let pass_ok = auth
        .password()
        .as_bytes()
        .ct_eq(credentials.password.as_bytes());
    bool::from(user_ok & pass_ok)
}

/// Middleware rejecting protected requests without matching basic credentials
pub async fn basic_auth(
    State(credentials): State<Arc<Credentials>>,
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
    next: Next,
) -> Response {
    if !credentials.is_enabled() || !is_protected_path(request.uri().path()) {
        return next.run(request).await;
    }

    if let Some(TypedHeader(auth)) = auth_header {
        if credentials_match(&auth, &credentials) {
            return next.run(request).await;
        }
        tracing::warn!(
            user = auth.username(),
            path = request.uri().path(),
            "Rejected basic auth credentials"
        );
    }

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static(REALM))],
        "Unauthorized.",
    )
        .into_response()
}
