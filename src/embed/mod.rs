#[cfg(feature = "clip")]
mod clip;

#[cfg(feature = "clip")]
pub use clip::ClipEmbedder;

use crate::error::{Error, Result};
use crate::normalize::NormalizedImage;

/// 语义编码器
///
/// 实现需要保证：相同版本的模型对相同输入的输出完全一致，
/// 同一 `model_version` 产生的向量可以用余弦相似度比较。
pub trait Embedder: Send + Sync {
    /// 模型版本，写入特征记录，用于判断两个向量是否可比较
    fn model_version(&self) -> &str;

    /// 输出向量的维数
    fn dimension(&self) -> usize;

    fn embed(&self, image: &NormalizedImage) -> Result<Vec<f32>>;

    /// 批量计算，结果顺序与输入一致，单张图片失败不影响其他图片
    fn embed_batch(&self, images: &[&NormalizedImage]) -> Vec<Result<Vec<f32>>> {
        images.iter().map(|image| self.embed(image)).collect()
    }
}

/// 检查模型输出的维数与数值，并做 L2 归一化
pub fn finalize_embedding(mut v: Vec<f32>, dimension: usize) -> Result<Vec<f32>> {
    if v.len() != dimension {
        return Err(Error::EmbeddingUnavailable(format!(
            "向量维数错误: {} != {dimension}",
            v.len()
        )));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(Error::EmbeddingUnavailable("向量包含非有限值".to_string()));
    }
    if !l2_normalize(&mut v) {
        return Err(Error::EmbeddingUnavailable("向量模长为 0".to_string()));
    }
    Ok(v)
}

/// 原地归一化，模长为 0 时返回 false
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0. || !norm.is_finite() {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    true
}

/// 余弦相似度，范围 [-1, 1]，任一向量模长为 0 或维数不同时返回 `None`
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0. || nb == 0. {
        return None;
    }
    Some((dot / (na.sqrt() * nb.sqrt())).clamp(-1., 1.))
}
