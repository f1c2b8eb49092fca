use std::f32::consts::PI;

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{HashOptions, PHASH_DCT_FACTOR};
use crate::hamming::BitHash;
use crate::normalize::NormalizedImage;

/// 相对直流分量小于该比例的 DCT 系数视为 0
const COEF_EPSILON: f32 = 1e-4;

/// 一张图片的三种感知哈希
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHashes {
    pub phash: BitHash,
    pub dhash: BitHash,
    pub ahash: BitHash,
}

/// 感知哈希计算器
///
/// 三种哈希的位长均为 `hash_size * hash_size`：
/// - aHash：`hash_size x hash_size` 灰度网格，与均值比较
/// - dHash：`(hash_size + 1) x hash_size` 灰度网格，与右侧像素比较
/// - pHash：`4 * hash_size` 边长灰度网格做二维 DCT，取左上角 `hash_size x hash_size` 低频块，
///   与除直流分量外其余系数的中位数比较
#[derive(Debug, Clone)]
pub struct PerceptualHasher {
    hash_size: u32,
    /// pHash 使用的 DCT-II 系数矩阵，只保留需要的低频行
    dct: Array2<f32>,
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::from(&HashOptions::default())
    }
}

impl From<&HashOptions> for PerceptualHasher {
    fn from(opts: &HashOptions) -> Self {
        Self::new(opts.hash_size)
    }
}

impl PerceptualHasher {
    /// # Panics
    ///
    /// `hash_size` 不是 4 的正整数倍时 panic，调用前应先经过 [`HashOptions::validate`]
    pub fn new(hash_size: u32) -> Self {
        assert!(hash_size > 0 && hash_size % 4 == 0, "invalid hash size: {hash_size}");
        let n = (hash_size * PHASH_DCT_FACTOR) as usize;
        let dct = Array2::from_shape_fn((hash_size as usize, n), |(k, i)| {
            (PI * (2 * i + 1) as f32 * k as f32 / (2 * n) as f32).cos()
        });
        Self { hash_size, dct }
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    pub fn bit_len(&self) -> usize {
        (self.hash_size * self.hash_size) as usize
    }

    pub fn hash(&self, image: &NormalizedImage) -> ImageHashes {
        let gray = imageops::grayscale(&image.pixels);
        ImageHashes {
            phash: self.phash_gray(&gray),
            dhash: self.dhash_gray(&gray),
            ahash: self.ahash_gray(&gray),
        }
    }

    pub fn average_hash(&self, image: &RgbImage) -> BitHash {
        self.ahash_gray(&imageops::grayscale(image))
    }

    pub fn difference_hash(&self, image: &RgbImage) -> BitHash {
        self.dhash_gray(&imageops::grayscale(image))
    }

    pub fn perceptual_hash(&self, image: &RgbImage) -> BitHash {
        self.phash_gray(&imageops::grayscale(image))
    }

    fn ahash_gray(&self, gray: &GrayImage) -> BitHash {
        let n = self.hash_size;
        let small = imageops::resize(gray, n, n, FilterType::Triangle);
        let pixels = small.as_raw();
        let mean = pixels.iter().map(|&p| p as f32).sum::<f32>() / pixels.len() as f32;
        BitHash::from_bits(pixels.iter().map(|&p| p as f32 > mean))
    }

    fn dhash_gray(&self, gray: &GrayImage) -> BitHash {
        let n = self.hash_size;
        let small = imageops::resize(gray, n + 1, n, FilterType::Triangle);
        BitHash::from_bits(
            (0..n).flat_map(|y| {
                let small = &small;
                (0..n).map(move |x| small.get_pixel(x, y)[0] > small.get_pixel(x + 1, y)[0])
            }),
        )
    }

    fn phash_gray(&self, gray: &GrayImage) -> BitHash {
        let n = self.dct.ncols() as u32;
        let small = imageops::resize(gray, n, n, FilterType::Triangle);
        let pixels = Array2::from_shape_fn((n as usize, n as usize), |(y, x)| {
            small.get_pixel(x as u32, y as u32)[0] as f32
        });
        // 可分离二维 DCT：C * X * C^T
        let mut coefs = self.dct.dot(&pixels).dot(&self.dct.t());
        // 理论上为 0 的系数只剩浮点误差，统一置 0，否则哈希位取决于舍入
        let eps = coefs[[0, 0]].abs() * COEF_EPSILON;
        coefs.mapv_inplace(|c| if c.abs() <= eps { 0. } else { c });
        // 直流分量只反映整体亮度，不参与中位数
        let median = median(coefs.iter().skip(1).copied().collect());
        BitHash::from_bits(coefs.iter().map(|&c| c > median))
    }
}

fn median(mut values: Vec<f32>) -> f32 {
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 { (values[mid - 1] + values[mid]) / 2. } else { values[mid] }
}
