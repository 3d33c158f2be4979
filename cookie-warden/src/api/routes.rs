//! Browse routes.

use std::path::Path;

use axum::Json;
use axum::Router;
use axum::extract::{Path as UrlPath, State};
use axum::routing::get;

use super::BrowseState;
use super::error::{ApiError, ApiResult};
use crate::database::SqlxContentRepository;
use crate::ingest::ContentItem;

pub fn router() -> Router<BrowseState> {
    Router::new()
        .route("/items/{id}", get(get_item_versions))
        .route("/items/{id}/children", get(get_item_children))
        .route("/files", get(list_archive_files))
}

fn content(state: &BrowseState) -> ApiResult<&SqlxContentRepository> {
    state
        .content
        .as_deref()
        .ok_or_else(|| ApiError::unavailable("Items are not archived in the database"))
}

async fn get_item_versions(
    State(state): State<BrowseState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<Vec<ContentItem>>> {
    let versions = content(&state)?.versions(&id).await?;
    if versions.is_empty() {
        return Err(ApiError::not_found(format!("Item '{id}' not found")));
    }
    Ok(Json(versions))
}

async fn get_item_children(
    State(state): State<BrowseState>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(content(&state)?.children_of(&id).await?))
}

/// `{source}/{file}` paths, sorted. A missing archive directory lists nothing.
async fn list_archive_files(State(state): State<BrowseState>) -> ApiResult<Json<Vec<String>>> {
    let root = &state.archive_dir;
    if !tokio::fs::try_exists(root).await.unwrap_or(false) {
        return Ok(Json(Vec::new()));
    }

    let mut files = Vec::new();
    let mut sources = tokio::fs::read_dir(root).await.map_err(crate::Error::from)?;
    while let Some(source) = sources.next_entry().await.map_err(crate::Error::from)? {
        if !source.file_type().await.map_err(crate::Error::from)?.is_dir() {
            continue;
        }
        collect_json(&source.path(), &source.file_name().to_string_lossy(), &mut files).await?;
    }
    files.sort();
    Ok(Json(files))
}

async fn collect_json(dir: &Path, source: &str, out: &mut Vec<String>) -> ApiResult<()> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(crate::Error::from)?;
    while let Some(entry) = entries.next_entry().await.map_err(crate::Error::from)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".json") {
            out.push(format!("{source}/{name}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::database::{init_pool, run_migrations};
    use crate::ingest::{ContentArchive, JsonFileArchive};

    fn item(id: &str, version: u64, parent: Option<&str>) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            version,
            source: "weibo".to_string(),
            published_at: Utc::now(),
            parent_id: parent.map(str::to_string),
            author: Some("poster".to_string()),
            headline: format!("{id} v{version}"),
            url: None,
            payload: json!({"mid": id}),
        }
    }

    async fn get(state: BrowseState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    async fn database_state() -> BrowseState {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = Arc::new(SqlxContentRepository::new(pool));
        repo.store(&item("root", 0, None)).await.unwrap();
        repo.store(&item("root", 1, None)).await.unwrap();
        repo.store(&item("reply-b", 0, Some("root"))).await.unwrap();
        repo.store(&item("reply-a", 0, Some("root"))).await.unwrap();
        BrowseState {
            content: Some(repo),
            archive_dir: "does-not-exist".into(),
        }
    }

    #[tokio::test]
    async fn test_item_versions_and_children() {
        let state = database_state().await;

        let (status, body) = get(state.clone(), "/api/items/root").await;
        assert_eq!(status, StatusCode::OK);
        let versions: Vec<u64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["version"].as_u64().unwrap())
            .collect();
        assert_eq!(versions, vec![0, 1]);

        let (status, body) = get(state.clone(), "/api/items/root/children").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["reply-a", "reply-b"]));

        let (status, body) = get(state, "/api/items/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_items_unavailable_without_database_archive() {
        let state = BrowseState {
            content: None,
            archive_dir: "does-not-exist".into(),
        };
        let (status, _) = get(state.clone(), "/api/items/root").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = get(state, "/api/files").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_directory_archive_is_listed_and_served() {
        let dir = tempfile::tempdir().unwrap();
        let archive = JsonFileArchive::new(dir.path());
        archive.store(&item("5001", 0, None)).await.unwrap();
        archive.store(&item("5001", 2, None)).await.unwrap();
        let state = BrowseState {
            content: None,
            archive_dir: dir.path().to_path_buf(),
        };

        let (status, body) = get(state.clone(), "/api/files").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["weibo/5001-v0.json", "weibo/5001-v2.json"]));

        let (status, body) = get(state, "/archive/weibo/5001-v2.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 2);
    }
}
