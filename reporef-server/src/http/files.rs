//! Dumb-protocol file serving from a reference's `.git` directory
//!
//! Only the paths a dumb HTTP git client needs are exposed. Mutable metadata
//! (`HEAD`, `info/refs`, `objects/info/*`) is read completely while the
//! working copy is share-locked, so a concurrent refresh can never hand out a
//! half-written file. Loose objects and packs never change once written and
//! are streamed through `ServeDir`.

use axum::{
    body::Body,
    extract::Request,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use reporef_core::RepoRef;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use super::error::{AppError, AppResult};

/// A servable path inside `.git`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitPath {
    /// Rewritten on every synchronization
    Metadata(String),
    /// Content-addressed, immutable once present
    Object(String),
}

impl GitPath {
    /// Classify a request suffix; `None` means the path is not served
    ///
    /// Accepts the suffix with or without a leading `.git/`.
    pub fn classify(suffix: &str) -> Option<Self> {
        let rel = suffix.strip_prefix(".git/").unwrap_or(suffix);

        if rel
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
            || rel.contains('\\')
        {
            return None;
        }

        match rel {
            "HEAD" | "info/refs" => Some(GitPath::Metadata(rel.to_string())),
            _ if rel.starts_with("objects/info/") => Some(GitPath::Metadata(rel.to_string())),
            _ if rel.starts_with("objects/") => Some(GitPath::Object(rel.to_string())),
            _ => None,
        }
    }
}

/// Serve `path` from `record`'s `.git` directory
pub async fn serve(record: &RepoRef, path: GitPath, mut request: Request) -> AppResult<Response> {
    let _files = record.read().await;

    match path {
        GitPath::Metadata(rel) => {
            let contents = match tokio::fs::read(record.git_dir().join(&rel)).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(AppError::NotFound)
                }
                Err(e) => return Err(e.into()),
            };

            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                contents,
            )
                .into_response())
        }
        GitPath::Object(rel) => {
            *request.uri_mut() = format!("/{}", rel)
                .parse::<Uri>()
                .map_err(|_| AppError::NotFound)?;

            let response = ServeDir::new(record.git_dir())
                .oneshot(request)
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            Ok(response.map(Body::new))
        }
    }
}
