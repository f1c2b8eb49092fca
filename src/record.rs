use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hamming::BitHash;

/// 三种感知哈希
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Phash,
    Dhash,
    Ahash,
}

impl HashKind {
    pub const ALL: [HashKind; 3] = [HashKind::Phash, HashKind::Dhash, HashKind::Ahash];

    /// 在 LMDB 哈希索引键中使用的前缀
    pub fn tag(self) -> u8 {
        match self {
            Self::Phash => b'p',
            Self::Dhash => b'd',
            Self::Ahash => b'a',
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Phash => "phash",
            Self::Dhash => "dhash",
            Self::Ahash => "ahash",
        };
        f.write_str(s)
    }
}

/// 主色，按出现频率从高到低排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DominantColor(pub [u8; 3]);

impl DominantColor {
    pub fn to_hex(&self) -> String {
        let [r, g, b] = self.0;
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

impl fmt::Display for DominantColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 一张图片的全部特征
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub item_id: String,

    pub phash: Option<BitHash>,
    pub dhash: Option<BitHash>,
    pub ahash: Option<BitHash>,
    /// L2 归一化后的语义向量
    pub semantic_embedding: Option<Vec<f32>>,

    pub width_px: u32,
    pub height_px: u32,
    pub aspect_ratio: f32,
    pub format: String,
    pub file_size_bytes: u64,
    pub color_space: String,
    pub is_grayscale: bool,

    pub sharpness_score: f32,
    pub contrast_score: f32,
    pub brightness_avg: f32,
    pub dominant_colors: Vec<DominantColor>,

    /// 生成语义向量的模型版本，不同版本的向量不可比较
    pub model_version: String,
    pub extraction_timestamp: DateTime<Utc>,
}

impl FeatureRecord {
    pub fn hash(&self, kind: HashKind) -> Option<&BitHash> {
        match kind {
            HashKind::Phash => self.phash.as_ref(),
            HashKind::Dhash => self.dhash.as_ref(),
            HashKind::Ahash => self.ahash.as_ref(),
        }
    }

    pub fn has_hash(&self) -> bool {
        HashKind::ALL.iter().any(|&kind| self.hash(kind).is_some())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
