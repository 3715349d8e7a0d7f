mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::get_images_handler,
        api::index_images_handler,
        api::search_handler,
        api::upload_images_handler,
        api::delete_image_handler,
    ),
    components(schemas(
        types::ImageItem,
        types::SearchItem,
        types::MessageResponse,
        types::UploadResponse,
        types::UploadForm,
        types::ErrorResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
///
/// 接口挂载在 `/api` 下，语料库目录以规范路径的前缀作为静态文件路径
pub fn create_app(state: Arc<AppState>, body_limit: usize) -> Router {
    // 会修改语料库或索引的接口需要验证 token
    let protected = Router::new()
        .route("/indexImages", get(api::index_images_handler))
        .route("/uploadImages", post(api::upload_images_handler))
        .route("/deleteImage", delete(api::delete_image_handler))
        .route_layer(from_fn_with_state(state.clone(), api::check_token));
    let api = Router::new()
        .route("/getImages", get(api::get_images_handler))
        .route("/search", get(api::search_handler))
        .merge(protected);

    let corpus = state.imvec.corpus();
    let files = ServeDir::new(corpus.root());
    let app = Router::new().nest("/api", api);
    let app = if corpus.prefix().is_empty() {
        app.fallback_service(files)
    } else {
        app.nest_service(&format!("/{}", corpus.prefix()), files)
    };

    app.merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}
