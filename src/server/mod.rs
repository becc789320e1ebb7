mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::search_handler,
        api::lexical_handler,
        api::list_handler,
        api::add_handler,
        api::metrics_handler,
    ),
    components(schemas(
        types::SearchRequest,
        types::SearchResponse,
        types::SemanticHit,
        types::LexicalRequest,
        types::LexicalResponse,
        types::LexicalHit,
        types::ListResponse,
        types::AddRequest,
        types::AddResponse,
        crate::db::ImageRecord,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", post(api::search_handler))
        .route("/lexical", post(api::lexical_handler))
        .route("/images", get(api::list_handler))
        .route("/add", post(api::add_handler))
        .route("/metrics", get(api::metrics_handler))
        .route("/api-docs/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        // 请求体限制：1M
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .with_state(state)
}
