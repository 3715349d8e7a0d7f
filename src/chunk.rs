//! 将有序序列切分为固定大小的批次

use std::num::NonZeroUsize;
use std::slice::Chunks;

/// 按 `size` 切分 `items`，除最后一批外每批长度均为 `size`
///
/// 每次调用都会得到相同的批次序列，按顺序拼接即可还原 `items`
pub fn chunked<T>(items: &[T], size: NonZeroUsize) -> Chunks<'_, T> {
    items.chunks(size.get())
}

/// 批次数量，即 `ceil(len / size)`
pub fn chunk_count(len: usize, size: NonZeroUsize) -> usize {
    len.div_ceil(size.get())
}
