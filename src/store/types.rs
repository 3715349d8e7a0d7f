use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

/// 所有向量都写入该命名空间
pub const DEFAULT_NAMESPACE: &str = "default";

/// 相似度度量
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// 余弦相似度
    #[default]
    Cosine,
    /// 内积
    Dotproduct,
    /// 欧氏距离，值越小越相似
    Euclidean,
}

impl Metric {
    /// 按该度量计算两个向量的得分
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        match self {
            Self::Dotproduct => dot,
            Self::Cosine => {
                let norm = norm(a) * norm(b);
                if norm == 0. { 0. } else { dot / norm }
            }
            Self::Euclidean => {
                a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
            }
        }
    }

    /// 得分越高越相似
    pub fn higher_is_better(self) -> bool {
        !matches!(self, Self::Euclidean)
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// 创建索引所需的参数
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub cloud: String,
    pub region: String,
}

/// 存储中已存在的索引
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    /// 数据面地址，内存存储没有该值
    pub host: Option<String>,
    pub ready: bool,
    pub state: String,
}

/// 缺失或为 `null` 的字段取默认值
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 向量元数据，其他程序写入的记录可能缺少 `imagePath`
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VectorMetadata {
    #[serde(rename = "imagePath", default, deserialize_with = "null_as_default")]
    pub image_path: String,
}

/// 写入存储的一条向量
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: VectorMetadata,
}

/// 元数据过滤条件
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `metadata.imagePath == path`
    ImagePath(String),
}

impl Filter {
    /// 转换为 Pinecone 的过滤表达式
    pub fn to_json(&self) -> Value {
        match self {
            Self::ImagePath(path) => json!({ "imagePath": { "$eq": path } }),
        }
    }

    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        match self {
            Self::ImagePath(path) => metadata.image_path == *path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub filter: Option<Filter>,
    pub include_metadata: bool,
}

/// 查询命中的向量
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: String,
    pub score: f32,
    pub metadata: Option<VectorMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((Metric::Cosine.score(&v, &v) - 1.).abs() < 1e-6);
        assert_eq!(Metric::Cosine.score(&v, &[0., 0., 0.]), 0.);
    }

    #[test]
    fn euclidean_is_distance() {
        assert_eq!(Metric::Euclidean.score(&[0., 0.], &[3., 4.]), 5.);
        assert!(!Metric::Euclidean.higher_is_better());
    }

    #[test]
    fn metadata_uses_camel_case() {
        let v = EmbeddingVector {
            id: "1".into(),
            values: vec![1.],
            metadata: VectorMetadata { image_path: "data/a.jpg".into() },
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["metadata"]["imagePath"], "data/a.jpg");
        assert_eq!(Filter::ImagePath("data/a.jpg".into()).to_json()["imagePath"]["$eq"], "data/a.jpg");
    }
}
