use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Query, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_auth::AuthBearer;
use axum_typed_multipart::{FieldData, TypedMultipart, TypedMultipartError};
use log::{info, warn};

use super::error::{AppError, Result, ResultExt};
use super::state::AppState;
use super::types::*;

const FETCH_FAILED: &str = "Error fetching images";
const INDEX_FAILED: &str = "Error indexing images";
const UPLOAD_FAILED: &str = "Error uploading images";
const DELETE_FAILED: &str = "Error deleting image";

/// 分页获取语料库中的图片
#[utoipa::path(
    get,
    path = "/api/getImages",
    params(PageQuery),
    responses(
        (status = 200, body = Vec<ImageItem>),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn get_images_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<ImageItem>>> {
    let records = state.imvec.list_page(query.page(), query.page_size()).await.or_fail(FETCH_FAILED)?;
    Ok(Json(records.into_iter().map(ImageItem::from).collect()))
}

/// 为语料库中的全部图片建立索引
#[utoipa::path(
    get,
    path = "/api/indexImages",
    responses(
        (status = 200, body = MessageResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn index_images_handler(State(state): State<Arc<AppState>>) -> Result<Json<MessageResponse>> {
    let Some(_guard) = state.indexing.try_acquire() else {
        warn!("已有索引任务在运行");
        return Err(AppError::internal(INDEX_FAILED, anyhow::anyhow!("已有索引任务在运行")));
    };
    info!("开始索引");
    state.imvec.index_all(false).await.or_fail(INDEX_FAILED)?;
    Ok(Json(MessageResponse::new("Indexing complete")))
}

/// 搜索相似图片
#[utoipa::path(
    get,
    path = "/api/search",
    params(ImagePathQuery),
    responses(
        (status = 200, body = Vec<SearchItem>),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImagePathQuery>,
) -> Result<Json<Vec<SearchItem>>> {
    let path = query.image_path.ok_or_else(|| anyhow::anyhow!("缺少 imagePath")).or_fail(FETCH_FAILED)?;
    let result = state.imvec.search(&path, crate::search::DEFAULT_TOP_K).await.or_fail(FETCH_FAILED)?;
    Ok(Json(result.into_iter().map(SearchItem::from).collect()))
}

/// 上传图片并写入索引，返回第一张图片所在的页码
#[utoipa::path(
    post,
    path = "/api/uploadImages",
    params(UploadQuery),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = UploadResponse),
        (status = 400, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn upload_images_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    data: std::result::Result<TypedMultipart<UploadRequest>, TypedMultipartError>,
) -> Result<Json<UploadResponse>> {
    let TypedMultipart(data) = data.or_fail(UPLOAD_FAILED)?;
    if data.images.is_empty() {
        return Err(AppError::bad_request("No files uploaded"));
    }

    // 全部校验通过后才写入磁盘
    let corpus = state.imvec.corpus();
    for file in &data.images {
        corpus
            .upload_name(file.metadata.file_name.as_deref(), &file.contents)
            .or_fail(UPLOAD_FAILED)?;
    }

    let _guard = state.indexing.acquire().await;
    let mut paths = Vec::with_capacity(data.images.len());
    if let Err(e) = store_and_index(&state, &data.images, &mut paths).await {
        for path in &paths {
            if let Err(e) = corpus.discard_upload(path).await {
                warn!("撤销上传 {path} 失败: {e}");
            }
        }
        return Err(AppError::internal(UPLOAD_FAILED, e));
    }
    info!("上传 {} 张图片", paths.len());

    let page = state.imvec.page_of(&paths[0], query.page_size()).await.or_fail(UPLOAD_FAILED)?;
    Ok(Json(UploadResponse { page_of_first_image: page.unwrap_or(1) }))
}

/// 写入上传的图片并建立索引，`paths` 记录已写入的文件
async fn store_and_index(
    state: &AppState,
    images: &[FieldData<Bytes>],
    paths: &mut Vec<String>,
) -> crate::Result<()> {
    for file in images {
        let path =
            state.imvec.corpus().store_upload(file.metadata.file_name.as_deref(), &file.contents).await?;
        paths.push(path);
    }
    state.imvec.upsert_paths(paths).await?;
    Ok(())
}

/// 删除图片及其向量
#[utoipa::path(
    delete,
    path = "/api/deleteImage",
    params(ImagePathQuery),
    responses(
        (status = 200, body = MessageResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn delete_image_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImagePathQuery>,
) -> Result<Json<MessageResponse>> {
    let path = query.image_path.ok_or_else(|| anyhow::anyhow!("缺少 imagePath")).or_fail(DELETE_FAILED)?;
    state.imvec.delete_image(&path).await.or_fail(DELETE_FAILED)?;
    Ok(Json(MessageResponse::new("Image deleted")))
}

type BearerRejection = <AuthBearer as FromRequestParts<Arc<AppState>>>::Rejection;

/// 设置了 token 时校验 `Authorization: Bearer <token>`
pub async fn check_token(
    State(state): State<Arc<AppState>>,
    bearer: std::result::Result<AuthBearer, BearerRejection>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(token) = &state.token {
        match bearer {
            Ok(AuthBearer(provided)) if provided == *token => {}
            _ => return AppError::unauthorized().into_response(),
        }
    }
    next.run(request).await
}
