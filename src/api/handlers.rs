use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use super::dto::{
    AddUrlRequest, CreateCategoryRequest, FileDto, FilesQuery, LinkDto, OkDto, StatusDto,
};
use super::error::HttpError;
use super::AppState;
use crate::link;
use crate::store::{Category, FileRecord};

/// Every link with its files, in insertion order.
async fn link_dtos(state: &AppState) -> Result<Vec<LinkDto>, HttpError> {
    let links = state.store.list_links().await?;
    let mut files_by_link: HashMap<i64, Vec<FileRecord>> = HashMap::new();
    for file in state.store.list_files(None).await? {
        files_by_link.entry(file.link_id).or_default().push(file);
    }

    let worker_id = state.processor.worker_id();
    Ok(links
        .into_iter()
        .map(|link| {
            let files = files_by_link.remove(&link.id).unwrap_or_default();
            LinkDto::new(link, files, worker_id)
        })
        .collect())
}

pub async fn add_url(
    State(state): State<AppState>,
    Json(req): Json<AddUrlRequest>,
) -> Result<(StatusCode, Json<LinkDto>), HttpError> {
    let url = link::decode_url(&req.url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
    let category = req
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let link = state.store.add_link(&url, category).await?;
    tracing::info!(link_id = link.id, url = %link.url, "Link enqueued");

    let files = state.store.list_files(Some(link.id)).await?;
    let dto = LinkDto::new(link, files, state.processor.worker_id());
    Ok((StatusCode::CREATED, Json(dto)))
}

pub async fn list_urls(State(state): State<AppState>) -> Result<Json<Vec<LinkDto>>, HttpError> {
    Ok(Json(link_dtos(&state).await?))
}

pub async fn delete_url(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<OkDto>, HttpError> {
    if state.store.get_link(id).await?.is_none() {
        return Err(HttpError::UrlNotFound(id));
    }
    if state.processor.current_link_id() == Some(id) {
        return Err(HttpError::CannotStopCurrentUrl(id));
    }

    if !state.store.delete_link(id).await? {
        return Err(HttpError::UrlNotFound(id));
    }
    tracing::info!(link_id = id, "Link deleted");
    Ok(Json(OkDto::ok()))
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Vec<FileDto>>, HttpError> {
    let files = state.store.list_files(query.url_id).await?;
    Ok(Json(files.into_iter().map(FileDto::from).collect()))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<FileDto>, HttpError> {
    let file = state
        .store
        .get_file(id)
        .await?
        .ok_or(HttpError::FileNotFound(id))?;
    Ok(Json(file.into()))
}

pub async fn status(State(state): State<AppState>) -> Result<Json<StatusDto>, HttpError> {
    let summary = state.store.summary().await?;
    let urls = link_dtos(&state).await?;
    Ok(Json(StatusDto {
        status: state.processor.status(),
        worker_id: state.processor.worker_id().to_string(),
        current_url_id: state.processor.current_link_id(),
        current_file_id: state.processor.current_file_id(),
        summary,
        urls,
    }))
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, HttpError> {
    Ok(Json(state.store.list_categories().await?))
}

pub async fn create_category(
    State(state): State<AppState>,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), HttpError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(HttpError::BadRequest("category name is empty".to_string()));
    }
    let category = state.store.create_category(name).await?;
    Ok((StatusCode::CREATED, Json(category)))
}
