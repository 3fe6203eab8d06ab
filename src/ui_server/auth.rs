//! Optional HTTP Basic authentication for the UIServer's `/ui` routes, per
//! spec.md §4.6. Grounded on the teacher's `interfaces/http/middleware.rs`
//! `from_fn` shape; the credential check itself is plain-text comparison
//! against `UiServerConfig`, since there is no user store here.

use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::UiServerState;

pub async fn basic_auth(State(state): State<UiServerState>, request: Request<axum::body::Body>, next: Next) -> Response {
    let (Some(expected_user), Some(expected_pass)) = (&state.auth_username, &state.auth_password) else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic)
        .is_some_and(|(user, pass)| &user == expected_user && &pass == expected_pass);

    if authorized {
        next.run(request).await
    } else {
        unauthorized_response()
    }
}

fn decode_basic(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn unauthorized_response() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"ui\"")
        .body(axum::body::Body::empty())
        .expect("static response is well-formed")
}
