//! 由规范路径计算向量 ID

/// ID 取 blake3 哈希的前 16 字节
const ID_BYTES: usize = 16;

/// 计算规范路径对应的向量 ID，固定 32 个十六进制字符
///
/// 与文件内容无关，同一路径重复索引会覆盖原有向量而不是新增
pub fn vector_id(canonical_path: &str) -> String {
    let hash = blake3::hash(canonical_path.as_bytes());
    hash.as_bytes()[..ID_BYTES].iter().map(|b| format!("{b:02x}")).collect()
}
