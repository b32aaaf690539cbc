//! Basic auth turned into session tokens.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use base64::prelude::*;
use tracing::debug;

use crate::error::{FrontendError, Result};
use crate::handlers::AppState;

/// Session token of the authenticated request.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// Decode an `Authorization: Basic ...` header value.
pub fn parse_basic_auth(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Authenticate every request against the session store.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let credentials = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_auth);

    let token = match credentials {
        Some((username, password)) => state.sessions.authenticate(&username, &password).await,
        None => {
            debug!("Request without Basic credentials");
            None
        }
    };

    let Some(token) = token else {
        return Err(FrontendError::Unauthorized {
            realm: state.realm.to_string(),
        });
    };

    req.extensions_mut().insert(SessionToken(token));
    Ok(next.run(req).await)
}
