use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::corpus::ImageRecord;
use crate::search::SearchResult;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// 解析正整数，无法解析或为 0 时使用默认值
fn positive_or(value: Option<&str>, default: usize) -> usize {
    value.and_then(|s| s.trim().parse().ok()).filter(|&n| n > 0).unwrap_or(default)
}

/// 分页参数
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 页码，从 1 开始，默认 1
    pub page: Option<String>,
    /// 每页数量，默认 10
    pub page_size: Option<String>,
}

impl PageQuery {
    pub fn page(&self) -> usize {
        positive_or(self.page.as_deref(), 1)
    }

    pub fn page_size(&self) -> usize {
        positive_or(self.page_size.as_deref(), DEFAULT_PAGE_SIZE)
    }
}

/// 上传接口的参数
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// 计算返回页码时使用的每页数量，默认 10
    pub page_size: Option<String>,
}

impl UploadQuery {
    pub fn page_size(&self) -> usize {
        positive_or(self.page_size.as_deref(), DEFAULT_PAGE_SIZE)
    }
}

/// 指定一张图片
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ImagePathQuery {
    /// 图片的规范路径，如 `data/a.jpg`
    pub image_path: Option<String>,
}

/// 上传请求
#[derive(TryFromMultipart)]
pub struct UploadRequest {
    #[form_data(limit = "unlimited")]
    pub images: Vec<FieldData<Bytes>>,
}

/// 上传表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct UploadForm {
    /// 上传的图片文件，可以是多张图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub images: Vec<String>,
}

/// 一张图片
#[derive(Debug, Serialize, ToSchema)]
pub struct ImageItem {
    /// 规范路径，同时也是静态文件的 URL
    pub src: String,
    pub alt: String,
}

impl From<ImageRecord> for ImageItem {
    fn from(record: ImageRecord) -> Self {
        Self { src: record.path, alt: record.alt_text }
    }
}

/// 一条搜索结果
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchItem {
    pub src: String,
    /// 相似度
    pub score: f32,
}

impl From<SearchResult> for SearchItem {
    fn from(result: SearchResult) -> Self {
        Self { src: result.src, score: result.score }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// 第一张上传图片所在的页码
    pub page_of_first_image: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
