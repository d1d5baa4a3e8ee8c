//! Request handlers

use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use reporef_core::{resolve, RepoRefSummary};
use serde::Serialize;
use tracing::debug;

use super::error::{AppError, AppResult};
use super::files::{self, GitPath};
use super::pages;
use super::AppState;

/// Response for `/stats`
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_reporefs: usize,
    pub reporefs: Vec<RepoRefSummary>,
}

/// `/`: there is no index page, send visitors to the project home
pub async fn home(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.server.home_url)
}

/// `/healthz`
pub async fn health() -> &'static str {
    "OK\n"
}

/// `/stats`
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let reporefs = state.registry.snapshot();
    Json(StatsResponse {
        total_reporefs: reporefs.len(),
        reporefs,
    })
}

/// Redirect requests arriving on an alias host to the canonical base URL
pub async fn redirect_alias_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bare_host = host.split(':').next().unwrap_or_default();

    let is_alias = state
        .server
        .alias_hosts
        .iter()
        .any(|alias| alias.eq_ignore_ascii_case(host) || alias.eq_ignore_ascii_case(bare_host));

    if is_alias {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = format!("{}{}", state.server.base_url.trim_end_matches('/'), path);
        return (StatusCode::FOUND, [(header::LOCATION, target)]).into_response();
    }

    next.run(request).await
}

/// Everything else: a repository reference, its files or its pages
pub async fn reporef(State(state): State<AppState>, request: Request) -> AppResult<Response> {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return Err(AppError::MethodNotAllowed);
    }

    let uri = request.uri().clone();
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let resolved = resolve(&state.providers, target)?;

    // decide before cloning anything; `go get` asks for subpackages too
    let go_get = wants_go_get(uri.query());
    let git_path = if resolved.remainder.is_empty() {
        None
    } else {
        match GitPath::classify(&resolved.remainder) {
            Some(path) => Some(path),
            None if go_get => None,
            None => return Err(AppError::NotFound),
        }
    };

    let record = state.registry.get_or_create(resolved.spec).await?;

    // a failed refresh is logged by the engine; the previous checkout is served
    if let Err(e) = state.registry.refresh_if_stale(&record).await {
        debug!(identity = %record.identity(), "Serving previous checkout: {}", e);
    }

    if let Some(path) = git_path {
        return files::serve(&record, path, request).await;
    }

    if go_get {
        return Ok(pages::go_get(&state.server, &resolved.prefix).into_response());
    }

    Ok(pages::reporef(&record).into_response())
}

fn wants_go_get(query: Option<&str>) -> bool {
    query.is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes()).any(|(key, value)| key == "go-get" && value == "1")
    })
}
