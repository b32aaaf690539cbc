//! HTTP handlers.
//!
//! Implements:
//! - GET /health - Health check endpoint
//! - GET /{*path} - Directory listing, file download, ZIP archive

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::middleware;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use filament_core::{sort_listing, FileInfo, Storage};
use filament_session::{ActiveOperation, SessionStore};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::archive::{build_zip, UNSUPPORTED_ARCHIVES};
use crate::auth::{require_session, SessionToken};
use crate::error::{FrontendError, Result};

/// Virtual directory holding the per-directory actions.
const ACTIONS_DIR: &str = ".filament/";
const ARCHIVE_ZIP: &str = "archive.zip";

/// Buffer between a backend download and the response body.
const DOWNLOAD_BUFFER: usize = 64 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub realm: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    let browse = Router::new()
        .route("/", get(browse_root_handler))
        .route("/{*path}", get(browse_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/health", get(health_handler))
        .merge(browse)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub sessions: usize,
}

/// GET /health - Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions.len(),
    })
}

#[derive(Debug, Serialize)]
pub struct Action {
    pub name: &'static str,
    pub link: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    pub parent: Option<String>,
    pub entries: Vec<FileInfo>,
    pub actions: Vec<Action>,
}

/// What a request path asks for.
#[derive(Debug, PartialEq, Eq)]
enum Target<'a> {
    /// ZIP of the given directory (with trailing slash)
    Zip(&'a str),
    Unsupported(&'static str),
    Entry,
}

fn classify(path: &str) -> Target<'_> {
    if let Some(actions) = path.strip_suffix(ARCHIVE_ZIP) {
        if let Some(dir) = actions.strip_suffix(ACTIONS_DIR) {
            if dir.ends_with('/') {
                return Target::Zip(dir);
            }
        }
    }

    for &format in UNSUPPORTED_ARCHIVES {
        if let Some(actions) = path.strip_suffix(format) {
            if actions.ends_with(&format!("/{}", ACTIONS_DIR)) {
                return Target::Unsupported(format);
            }
        }
    }

    Target::Entry
}

/// First language tag of an `Accept-Language` header.
fn preferred_language(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::ACCEPT_LANGUAGE)?.to_str().ok()?;
    let tag = value.split(',').next()?.split(';').next()?.trim();
    if tag.is_empty() || tag == "*" {
        None
    } else {
        Some(tag.to_string())
    }
}

/// What the browse handlers need from a request, detached from it.
struct BrowseRequest {
    token: String,
    language: Option<String>,
    /// Path as sent by the client, for redirects
    request_path: String,
    /// Storage path, starting with `/`
    path: String,
}

impl BrowseRequest {
    fn new(token: SessionToken, headers: &HeaderMap, uri: &Uri, path: String) -> Self {
        Self {
            token: token.0,
            language: preferred_language(headers),
            request_path: uri.path().to_string(),
            path,
        }
    }
}

/// GET / - the root directory.
pub async fn browse_root_handler(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response> {
    let request = BrowseRequest::new(token, &headers, &uri, "/".to_string());
    serve(state, request).await
}

/// GET /{*path} - any entry below the root.
pub async fn browse_handler(
    State(state): State<AppState>,
    Extension(token): Extension<SessionToken>,
    headers: HeaderMap,
    uri: Uri,
    Path(path): Path<String>,
) -> Result<Response> {
    let request = BrowseRequest::new(token, &headers, &uri, format!("/{}", path));
    serve(state, request).await
}

async fn serve(state: AppState, request: BrowseRequest) -> Result<Response> {
    let session = state
        .sessions
        .get_by_token(&request.token)
        .ok_or(FrontendError::Forbidden)?;
    let pin = session.pin();

    if session.language().is_none() {
        if let Some(language) = request.language {
            session.set_language(language);
        }
    }

    let target = match classify(&request.path) {
        Target::Zip(dir) => Some(dir.to_string()),
        Target::Unsupported(format) => return Err(FrontendError::NotImplemented(format)),
        Target::Entry => None,
    };
    let mut response = match target {
        Some(dir) => zip_response(pin, dir).await?,
        None => entry_response(pin, request.request_path, request.path).await?,
    };

    if let Some(language) = session.language() {
        if let Ok(value) = HeaderValue::from_str(&language) {
            response
                .headers_mut()
                .insert(header::CONTENT_LANGUAGE, value);
        }
    }
    Ok(response)
}

async fn zip_response(pin: ActiveOperation, dir: String) -> Result<Response> {
    let (file, length) = {
        let mut storage = pin
            .session()
            .storage()
            .await
            .ok_or(FrontendError::Forbidden)?;
        let info = storage.stat(&dir).await?;
        if !info.is_dir {
            return Err(FrontendError::NotADirectory);
        }
        build_zip(&mut *storage, &dir).await?
    };
    // The archive is complete; the client downloads it without the session.
    drop(pin);

    let name = dir
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("archive");
    let disposition = format!("attachment; filename=\"{}.zip\"", name.replace('"', ""));

    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(file)));
    let mut response = (StatusCode::OK, body).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn entry_response(
    pin: ActiveOperation,
    request_path: String,
    path: String,
) -> Result<Response> {
    let mut storage = pin
        .session()
        .storage()
        .await
        .ok_or(FrontendError::Forbidden)?;
    let info = storage.stat(&path).await?;

    if info.is_dir {
        if !path.ends_with('/') {
            let location = format!("{}/", request_path);
            debug!("Redirecting directory {} to {}", path, location);
            return Ok(Redirect::temporary(&location).into_response());
        }

        let mut entries = storage.read_dir(&path).await?;
        sort_listing(&mut entries);
        let listing = DirectoryListing {
            parent: (path != "/").then(|| "..".to_string()),
            path,
            entries,
            actions: vec![Action {
                name: "Download as ZIP archive",
                link: ".filament/archive.zip",
            }],
        };
        return Ok(Json(listing).into_response());
    }

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let (mut writer, reader) = tokio::io::duplex(DOWNLOAD_BUFFER);

    // The transfer outlives the handler. The backend guard and the pin move
    // along, so the session cannot expire mid-download.
    tokio::spawn(async move {
        match storage.retrieve(&path, &mut writer).await {
            Ok(written) => debug!("Sent {} ({} bytes)", path, written),
            Err(e) => warn!("Writing {} from storage to HTTP failed: {}", path, e),
        }
        drop(storage);
        drop(pin);
    });

    let mut response = (StatusCode::OK, Body::from_stream(ReaderStream::new(reader))).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.size));
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
