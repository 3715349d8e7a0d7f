use std::path::Path;

use anyhow::Context;
use image::RgbImage;
use image::imageops::FilterType;
use tokio::task::spawn_blocking;

use super::EmbeddingProvider;

/// 每个颜色通道的分桶数
const BINS_PER_CHANNEL: usize = 8;
/// 直方图维数
pub const HISTOGRAM_BINS: usize = BINS_PER_CHANNEL * BINS_PER_CHANNEL * BINS_PER_CHANNEL;
/// 计算前将图片缩放到该尺寸以内
const MAX_SIDE: u32 = 256;

/// 基于 RGB 颜色直方图的本地嵌入
///
/// 不依赖模型，结果经过 L2 归一化，余弦相似度即直方图夹角
#[derive(Debug, Clone, Default)]
pub struct HistogramEmbedder;

impl HistogramEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// 计算已解码图片的直方图
    pub fn histogram(image: &RgbImage) -> Vec<f32> {
        let shift = 8 - BINS_PER_CHANNEL.trailing_zeros();
        let mut hist = vec![0f32; HISTOGRAM_BINS];
        for pixel in image.pixels() {
            let [r, g, b] = pixel.0.map(|c| (c >> shift) as usize);
            hist[(r * BINS_PER_CHANNEL + g) * BINS_PER_CHANNEL + b] += 1.;
        }
        let norm = hist.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0. {
            hist.iter_mut().for_each(|x| *x /= norm);
        }
        hist
    }

    /// 解码图片字节并计算直方图
    pub fn embed_bytes(data: &[u8]) -> anyhow::Result<Vec<f32>> {
        let image = image::load_from_memory(data).context("解码图片失败")?;
        let image = if image.width() > MAX_SIDE || image.height() > MAX_SIDE {
            image.resize(MAX_SIDE, MAX_SIDE, FilterType::Triangle)
        } else {
            image
        };
        Ok(Self::histogram(&image.to_rgb8()))
    }
}

impl EmbeddingProvider for HistogramEmbedder {
    fn dimension(&self) -> Option<usize> {
        Some(HISTOGRAM_BINS)
    }

    async fn check(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn embed(&self, path: &Path) -> anyhow::Result<Vec<f32>> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("读取 {} 失败", path.display()))?;
        spawn_blocking(move || Self::embed_bytes(&data)).await?
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb};

    use super::*;
    use crate::store::Metric;

    fn png(color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(32, 32, Rgb(color));
        let mut buf = Cursor::new(vec![]);
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn histogram_is_normalized() {
        let hist = HistogramEmbedder::embed_bytes(&png([200, 30, 30])).unwrap();
        assert_eq!(hist.len(), HISTOGRAM_BINS);
        let norm = hist.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.).abs() < 1e-5);
    }

    #[test]
    fn similar_colors_score_higher() {
        let red = HistogramEmbedder::embed_bytes(&png([200, 30, 30])).unwrap();
        let dark_red = HistogramEmbedder::embed_bytes(&png([205, 25, 35])).unwrap();
        let blue = HistogramEmbedder::embed_bytes(&png([30, 30, 200])).unwrap();
        assert!(Metric::Cosine.score(&red, &dark_red) > Metric::Cosine.score(&red, &blue));
    }

    #[test]
    fn rejects_garbage() {
        assert!(HistogramEmbedder::embed_bytes(b"not an image").is_err());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let result = HistogramEmbedder::new().embed(Path::new("/nonexistent/a.png")).await;
        assert!(result.is_err());
    }
}
