use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use axum_auth::AuthBearer;
use log::info;

use super::error::{Result, Unauthorized};
use super::state::AppState;
use super::types::*;
use crate::IngestOutcome;
use crate::metrics;

/// 语义搜索
#[utoipa::path(
    post,
    path = "/search",
    request_body = SearchRequest,
    responses(
        (status = 200, body = SearchResponse),
        (status = 503, description = "向量索引为空"),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    info!("语义搜索: {:?}", data.query);

    let search = state.catalog.search_semantic(&data.query, data.k).await?;
    let result = search
        .results
        .into_iter()
        .map(|(record, distance)| SemanticHit { distance, record })
        .collect();

    Ok(Json(SearchResponse {
        time: start.elapsed().as_millis() as u64,
        version: search.version,
        result,
    }))
}

/// 全文检索
#[utoipa::path(
    post,
    path = "/lexical",
    request_body = LexicalRequest,
    responses(
        (status = 200, body = LexicalResponse),
        (status = 400, description = "查询不包含任何单词"),
    )
)]
pub async fn lexical_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<LexicalRequest>,
) -> Result<Json<LexicalResponse>> {
    let start = Instant::now();
    let result = state
        .catalog
        .search_lexical(&data.query, data.limit)
        .await?
        .into_iter()
        .map(|(record, score)| LexicalHit { score, record })
        .collect();

    Ok(Json(LexicalResponse { time: start.elapsed().as_millis() as u64, result }))
}

/// 按添加时间倒序列出图片
#[utoipa::path(
    get,
    path = "/images",
    params(ListQuery),
    responses(
        (status = 200, body = ListResponse),
    )
)]
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    let result =
        state.catalog.list(Some(query.limit), query.offset, query.filter.as_deref()).await?;
    let total = state.catalog.count().await?;
    Ok(Json(ListResponse { total, result }))
}

/// 添加服务器上的一张图片
#[utoipa::path(
    post,
    path = "/add",
    request_body = AddRequest,
    responses(
        (status = 200, body = AddResponse),
        (status = 401, description = "鉴权失败"),
    )
)]
pub async fn add_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    Json(data): Json<AddRequest>,
) -> Result<Json<AddResponse>> {
    if token != state.token {
        return Err(Unauthorized.into());
    }

    let outcome = state.catalog.ingest(&data.path).await;
    let label = outcome.label().to_owned();
    let id = match outcome {
        IngestOutcome::Skipped => None,
        IngestOutcome::Indexed { id, .. } => Some(id),
        IngestOutcome::Failed(e) => return Err(e.into()),
    };
    state.catalog.flush()?;

    Ok(Json(AddResponse { outcome: label, id }))
}

/// prometheus 指标
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, body = String, content_type = "text/plain"),
    )
)]
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::encode_text()?)
}
