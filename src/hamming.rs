use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

use crate::error::{Error, Result};

#[inline(always)]
pub fn hamming(va: &[u8], vb: &[u8]) -> u32 {
    match va.len() {
        8 => hamming_64(va, vb),
        _ => hamming_naive(va, vb),
    }
}

#[inline(always)]
pub fn hamming_naive(va: &[u8], vb: &[u8]) -> u32 {
    va.iter().zip(vb).map(|(a, b)| (a ^ b).count_ones()).sum()
}

#[inline(always)]
pub fn hamming_64(va: &[u8], vb: &[u8]) -> u32 {
    match (<[u8; 8]>::try_from(va), <[u8; 8]>::try_from(vb)) {
        (Ok(a), Ok(b)) => (u64::from_ne_bytes(a) ^ u64::from_ne_bytes(b)).count_ones(),
        _ => hamming_naive(va, vb),
    }
}

/// 定长二进制指纹，按行优先顺序打包，每个字节高位在前
///
/// 256 位以内的哈希不会产生堆分配
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitHash(SmallVec<[u8; 32]>);

impl BitHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(SmallVec::from_slice(bytes))
    }

    /// 将 bool 序列打包为哈希，长度必须是 8 的倍数
    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let mut bytes = SmallVec::new();
        let mut b = 0u8;
        let mut n = 0;
        for bit in bits {
            b = (b << 1) | bit as u8;
            n += 1;
            if n == 8 {
                bytes.push(b);
                b = 0;
                n = 0;
            }
        }
        debug_assert_eq!(n, 0, "bit count must be a multiple of 8");
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn bit_len(&self) -> usize {
        self.0.len() * 8
    }

    /// 汉明距离，位长不同时报错而不是截断
    pub fn distance(&self, other: &Self) -> Result<u32> {
        if self.bit_len() != other.bit_len() {
            return Err(Error::IncompatibleHashLength {
                left: self.bit_len(),
                right: other.bit_len(),
            });
        }
        Ok(hamming(&self.0, &other.0))
    }

    /// `1 - distance / bit_len`，范围 [0, 1]
    pub fn similarity(&self, other: &Self) -> Result<f32> {
        let d = self.distance(other)?;
        Ok(1. - d as f32 / self.bit_len() as f32)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for BitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitHash({})", self.to_hex())
    }
}

impl FromStr for BitHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() % 2 != 0 || s.is_empty() {
            return Err(format!("无效的十六进制哈希: {s}"));
        }
        let bytes = (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
            .collect::<Result<SmallVec<_>, _>>()
            .map_err(|e| format!("无效的十六进制哈希 {s}: {e}"))?;
        Ok(Self(bytes))
    }
}

// JSON 等可读格式中使用十六进制，二进制格式中直接保存字节
impl Serialize for BitHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for BitHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(D::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            Ok(Self(SmallVec::from_vec(bytes)))
        }
    }
}

/// 由汉明距离划分的相似度等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityTier {
    Identical,
    VerySimilar,
    Similar,
    SomewhatSimilar,
    Different,
}

/// 各等级的最大汉明距离（含）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierThresholds {
    pub identical: u32,
    pub very_similar: u32,
    pub similar: u32,
    pub somewhat_similar: u32,
}

impl SimilarityTier {
    pub fn from_distance(distance: u32, t: &TierThresholds) -> Self {
        if distance <= t.identical {
            Self::Identical
        } else if distance <= t.very_similar {
            Self::VerySimilar
        } else if distance <= t.similar {
            Self::Similar
        } else if distance <= t.somewhat_similar {
            Self::SomewhatSimilar
        } else {
            Self::Different
        }
    }

    /// 是否至少达到 `similar`
    pub fn is_similar(&self) -> bool {
        *self <= Self::Similar
    }
}

impl fmt::Display for SimilarityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Identical => "identical",
            Self::VerySimilar => "very_similar",
            Self::Similar => "similar",
            Self::SomewhatSimilar => "somewhat_similar",
            Self::Different => "different",
        };
        f.write_str(s)
    }
}
