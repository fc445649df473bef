//! HTTP front for the local document search engine.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chatpipe_core::{DocSearchRequest, ValidatePathResponse};
use chatpipe_local::docsearch;
use std::net::SocketAddr;

pub const DEFAULT_BIND: &str = "127.0.0.1:3001";

pub fn router() -> Router {
    Router::new()
        .route("/", get(status))
        .route("/api/search", post(search))
        .route("/api/validate-path", post(validate_path))
}

pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind {addr}: {e} (is another server on this port?)"))?;
    tracing::info!(%addr, "document search server listening");
    axum::serve(listener, router()).await?;
    Ok(())
}

async fn status() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "Server is running" }))
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::warn!(error = %e, "document search failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Internal server error", "details": e.to_string() })),
    )
        .into_response()
}

/// Parse the body by hand so malformed requests get the `{error, details}` shape.
fn parse_search_request(v: &serde_json::Value) -> Result<DocSearchRequest, serde_json::Value> {
    let query = v.get("query").and_then(|q| q.as_str()).unwrap_or("");
    let paths = v.get("searchPaths").and_then(|p| p.as_array());
    let types = v.get("fileTypes").and_then(|t| t.as_array());
    let strings = |a: &Vec<serde_json::Value>| -> Option<Vec<String>> {
        a.iter().map(|x| x.as_str().map(str::to_string)).collect()
    };
    let search_paths = paths.and_then(strings);
    let file_types = types.and_then(strings);

    match (query.is_empty(), search_paths, file_types) {
        (false, Some(search_paths), Some(file_types)) => Ok(DocSearchRequest {
            query: query.to_string(),
            search_paths,
            file_types,
        }),
        (empty, search_paths, file_types) => Err(serde_json::json!({
            "error": "Invalid request parameters",
            "details": {
                "queryPresent": !empty,
                "searchPathsValid": search_paths.is_some(),
                "fileTypesValid": file_types.is_some(),
            }
        })),
    }
}

async fn search(body: Option<Json<serde_json::Value>>) -> Response {
    let v = body.map(|Json(v)| v).unwrap_or_default();
    let req = match parse_search_request(&v) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(body = %v, "rejected search request");
            return (StatusCode::BAD_REQUEST, Json(e)).into_response();
        }
    };
    tracing::info!(query = %req.query, roots = ?req.search_paths, "search request");

    match tokio::task::spawn_blocking(move || docsearch::search(&req)).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn validate_path(body: Option<Json<serde_json::Value>>) -> Response {
    let path = body
        .and_then(|Json(v)| v.get("path").and_then(|p| p.as_str()).map(str::to_string))
        .unwrap_or_default();
    if path.is_empty() {
        return Json(ValidatePathResponse { is_valid: false }).into_response();
    }
    match tokio::task::spawn_blocking(move || docsearch::validate_path(&path)).await {
        Ok(is_valid) => Json(ValidatePathResponse { is_valid }).into_response(),
        Err(e) => internal_error(e),
    }
}
