use std::sync::Arc;

use axum::extract::{Extension, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::archive::FeedArchive;
use crate::fetch::FeedFetcher;
use crate::models::{FeedItem, FeedSource};
use crate::sources::SourceStore;
use crate::translate::{TranslationPair, Translator};

#[derive(Clone)]
pub struct AppState {
    pub sources: Arc<SourceStore>,
    pub fetcher: Arc<FeedFetcher>,
    pub translator: Arc<Translator>,
    pub archive: Arc<FeedArchive>,
    /// Items per sequential translation chunk.
    pub batch_size: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/feeds", get(feeds_handler))
        .route(
            "/feeds/sources",
            get(list_sources_handler)
                .post(add_source_handler)
                .put(update_sources_handler),
        )
        .layer(Extension(state))
}

/// Invalid requests surface as 4xx; everything else the pipeline already
/// degraded internally, so a 500 here means a genuine bug or disk-level
/// problem in source management.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::SourceNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(err) => {
                error!("Request failed: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedsQuery {
    source_id: Option<String>,
    refresh: bool,
    translate: Option<bool>,
    clear_translations: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedsResponse {
    items: Vec<FeedItem>,
    source_count: usize,
    total_items: usize,
}

/// GET /feeds: fetch, hydrate from the archive, translate what is still
/// English, archive the result, return the merged list.
async fn feeds_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<FeedsQuery>,
) -> Result<Json<FeedsResponse>, ApiError> {
    let sources = state.sources.list().await;

    if query.refresh {
        // Refresh re-fetches feeds but keeps translations; they are the
        // paid part of the pipeline and survive a cache drop
        state.fetcher.clear(query.source_id.as_deref()).await;
    }

    if query.clear_translations {
        state.translator.clear().await;
        state.archive.clear().await;
    }

    let items = match query.source_id.as_deref() {
        Some(id) => {
            let source = sources
                .iter()
                .find(|source| source.id == id)
                .ok_or_else(|| ApiError::SourceNotFound(id.to_string()))?;
            state.fetcher.fetch_one(source).await
        }
        None => state.fetcher.fetch_many(&sources).await,
    };

    // Archived translations first, so already-known links skip the
    // translation step entirely
    let items = state.archive.hydrate(items).await;

    let items = if query.translate.unwrap_or(true) {
        translate_items(&state.translator, state.batch_size, items).await
    } else {
        items
    };

    state.archive.upsert(&items).await;

    let source_count = sources.iter().filter(|source| source.enabled).count();
    let total_items = items.len();
    Ok(Json(FeedsResponse {
        items,
        source_count,
        total_items,
    }))
}

/// Translate English items in fixed-size chunks, sequentially. A failed
/// chunk keeps its original items; later chunks still run.
async fn translate_items(
    translator: &Translator,
    batch_size: usize,
    mut items: Vec<FeedItem>,
) -> Vec<FeedItem> {
    let pending: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.needs_translation())
        .map(|(index, _)| index)
        .collect();

    if pending.is_empty() {
        return items;
    }
    info!(
        "Translating {} English items in chunks of {}",
        pending.len(),
        batch_size
    );

    for chunk in pending.chunks(batch_size.max(1)) {
        let input: Vec<TranslationPair> = chunk
            .iter()
            .map(|&index| TranslationPair {
                title: items[index].title.clone(),
                description: items[index].description.clone(),
            })
            .collect();

        let output = match translator.translate_batch(&input).await {
            Ok(pairs) => pairs,
            Err(err) => {
                error!("Chunk translation failed, keeping originals: {err}");
                continue;
            }
        };

        for (&index, (original, translated)) in chunk.iter().zip(input.iter().zip(output.iter())) {
            // An unchanged pair means the translator fell back; leave the
            // item pending so it is retried and never archived as done
            if translated == original {
                continue;
            }
            let item = &mut items[index];
            item.original_title = Some(item.title.clone());
            item.original_description = Some(item.description.clone());
            item.title = translated.title.clone();
            item.description = translated.description.clone();
            item.is_translated = true;
        }
    }

    let translated_count = items.iter().filter(|item| item.is_translated).count();
    info!(
        "Translation complete: {}/{} items translated",
        translated_count,
        items.len()
    );
    items
}

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<FeedSource>,
}

async fn list_sources_handler(Extension(state): Extension<AppState>) -> Json<SourcesResponse> {
    Json(SourcesResponse {
        sources: state.sources.list().await,
    })
}

#[derive(Debug, Deserialize)]
struct AddSourceRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

#[derive(Serialize)]
struct AddSourceResponse {
    source: FeedSource,
    sources: Vec<FeedSource>,
}

async fn add_source_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<AddSourceRequest>,
) -> Result<Json<AddSourceResponse>, ApiError> {
    if body.name.trim().is_empty() || body.url.trim().is_empty() {
        return Err(ApiError::BadRequest("name and url are required".to_string()));
    }

    let source = state.sources.add(body.name.trim(), body.url.trim()).await?;
    let sources = state.sources.list().await;
    Ok(Json(AddSourceResponse { source, sources }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum SourceAction {
    Toggle,
    Delete,
    ReplaceAll,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSourcesRequest {
    action: SourceAction,
    source_id: Option<String>,
    sources: Option<Vec<FeedSource>>,
}

async fn update_sources_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<UpdateSourcesRequest>,
) -> Result<Json<SourcesResponse>, ApiError> {
    let sources = match body.action {
        SourceAction::Toggle => {
            let id = body
                .source_id
                .ok_or_else(|| ApiError::BadRequest("sourceId is required".to_string()))?;
            state.sources.toggle(&id).await?
        }
        SourceAction::Delete => {
            let id = body
                .source_id
                .ok_or_else(|| ApiError::BadRequest("sourceId is required".to_string()))?;
            state.sources.delete(&id).await?
        }
        SourceAction::ReplaceAll => {
            let new_sources = body
                .sources
                .ok_or_else(|| ApiError::BadRequest("sources is required".to_string()))?;
            state.sources.replace_all(new_sources).await?
        }
    };

    Ok(Json(SourcesResponse { sources }))
}
