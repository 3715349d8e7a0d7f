//! 图片语料库：目录扫描、分页、上传写入与软删除

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};
use regex::Regex;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// 软删除时追加到文件名末尾的标记
pub const DELETED_SUFFIX: &str = "_deleted";

/// 语料库中的一张图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// 规范路径
    pub path: String,
    /// 替代文本，取文件名主干
    pub alt_text: String,
}

impl ImageRecord {
    pub fn new(path: String) -> Self {
        let alt_text = Path::new(&path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, alt_text }
    }
}

#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    prefix: String,
    suffix: Regex,
}

impl Corpus {
    /// # Arguments
    ///
    /// * `root` - 图片所在目录
    /// * `prefix` - 规范路径的公开前缀，如 `data`
    /// * `suffix` - 允许的扩展名，多个用逗号分隔
    pub fn new(root: impl Into<PathBuf>, prefix: &str, suffix: &str) -> Result<Self> {
        let pattern = suffix
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>();
        if pattern.is_empty() {
            return Err(Error::Config("至少需要一个图片扩展名".to_string()));
        }
        let suffix = Regex::new(&format!("(?i)^({})$", pattern.join("|")))
            .map_err(|e| Error::Config(format!("无效的扩展名列表: {e}")))?;
        Ok(Self {
            root: root.into(),
            prefix: prefix.trim_matches('/').to_string(),
            suffix,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 列出所有图片的规范路径，按字典序排列
    ///
    /// 不依赖文件系统的遍历顺序，语料不变时多次调用结果一致
    pub fn list(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .map(Error::Io)
                    .unwrap_or_else(|| Error::InvalidPath(self.root.display().to_string()))
            })?;
            if !entry.file_type().is_file() || !self.is_image(entry.path()) {
                continue;
            }
            if let Some(path) = self.canonical(entry.path()) {
                paths.push(path);
            }
        }
        paths.sort_unstable();
        debug!("扫描 {} 完成，共 {} 张图片", self.root.display(), paths.len());
        Ok(paths)
    }

    pub fn records(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.list()?.into_iter().map(ImageRecord::new).collect())
    }

    /// 是否为未删除且扩展名符合的图片文件
    pub fn is_image(&self, path: &Path) -> bool {
        let deleted = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(DELETED_SUFFIX));
        !deleted && path.extension().is_some_and(|ext| self.suffix.is_match(&ext.to_string_lossy()))
    }

    /// 将语料库目录下的文件路径转换为规范路径
    pub fn canonical(&self, file: &Path) -> Option<String> {
        let relative = file.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?.to_string()),
                _ => return None,
            }
        }
        if parts.is_empty() {
            return None;
        }
        let relative = parts.join("/");
        if self.prefix.is_empty() {
            Some(relative)
        } else {
            Some(format!("{}/{}", self.prefix, relative))
        }
    }

    /// 将规范路径解析为磁盘路径，拒绝语料库之外的路径
    pub fn resolve(&self, canonical: &str) -> Result<PathBuf> {
        let invalid = || Error::InvalidPath(canonical.to_string());
        let relative = if self.prefix.is_empty() {
            canonical
        } else {
            canonical
                .strip_prefix(self.prefix.as_str())
                .and_then(|s| s.strip_prefix('/'))
                .ok_or_else(invalid)?
        };
        let mut path = self.root.clone();
        for part in relative.split('/') {
            if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
                return Err(invalid());
            }
            path.push(part);
        }
        Ok(path)
    }

    /// 校验上传的内容并给出保存时使用的文件名主干与扩展名，不写入磁盘
    ///
    /// 文件名经过清理，无法使用原文件名时以内容哈希命名
    pub fn upload_name(&self, file_name: Option<&str>, data: &[u8]) -> Result<(String, String)> {
        let format = image::guess_format(data)
            .map_err(|_| Error::InvalidPath(file_name.unwrap_or("<unnamed>").to_string()))?;

        let original = file_name.map(Path::new);
        let stem = original
            .and_then(|p| p.file_stem())
            .map(|s| sanitize(&s.to_string_lossy()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| blake3::hash(data).to_hex()[..16].to_string());
        let ext = original
            .and_then(|p| p.extension())
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .filter(|e| self.suffix.is_match(e))
            .or_else(|| {
                let ext = format.extensions_str().first()?;
                self.suffix.is_match(ext).then(|| ext.to_string())
            })
            .ok_or_else(|| Error::InvalidPath(stem.clone()))?;
        Ok((stem, ext))
    }

    /// 保存上传的图片，返回其规范路径
    ///
    /// 重名时在扩展名前追加 `-n`
    pub async fn store_upload(&self, file_name: Option<&str>, data: &[u8]) -> Result<String> {
        let (stem, ext) = self.upload_name(file_name, data)?;
        tokio::fs::create_dir_all(&self.root).await?;
        for n in 0.. {
            let name = match n {
                0 => format!("{stem}.{ext}"),
                n => format!("{stem}-{n}.{ext}"),
            };
            let path = self.root.join(&name);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(data).await?;
            file.flush().await?;
            let canonical = self.canonical(&path).ok_or_else(|| Error::InvalidPath(name))?;
            info!("保存上传图片: {canonical}");
            return Ok(canonical);
        }
        unreachable!()
    }

    /// 撤销一次上传，直接删除文件
    pub async fn discard_upload(&self, canonical: &str) -> Result<()> {
        let path = self.resolve(canonical)?;
        tokio::fs::remove_file(&path).await?;
        info!("撤销上传图片: {canonical}");
        Ok(())
    }

    /// 软删除：重命名为 `<文件名>_deleted`，文件保留在磁盘上
    pub async fn soft_delete(&self, canonical: &str) -> Result<PathBuf> {
        let path = self.resolve(canonical)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::NotFound(canonical.to_string()));
        }
        let target = deleted_path(&path);
        if tokio::fs::try_exists(&target).await? {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} 已存在", target.display()),
            )));
        }
        tokio::fs::rename(&path, &target).await?;
        info!("软删除图片: {} -> {}", path.display(), target.display());
        Ok(target)
    }
}

/// 软删除后的文件路径
pub fn deleted_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(DELETED_SUFFIX);
    PathBuf::from(name)
}

/// 返回第 `page` 页（从 1 开始）的切片，`page` 为 0 时视为 1，越界时返回空
pub fn page<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    let start = (page.max(1) - 1).saturating_mul(page_size);
    if start >= items.len() {
        return &[];
    }
    let end = start.saturating_add(page_size).min(items.len());
    &items[start..end]
}

/// 返回 `item` 所在的页码（从 1 开始）
pub fn page_of<T: PartialEq>(items: &[T], item: &T, page_size: usize) -> Option<usize> {
    if page_size == 0 {
        return None;
    }
    items.iter().position(|x| x == item).map(|i| i / page_size + 1)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
