use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::config::AnalyzeOptions;
use crate::kmeans::kmeans;
use crate::normalize::NormalizedImage;
use crate::record::DominantColor;

/// 拉普拉斯方差的归一化除数，方差达到该值时清晰度记为 1
const SHARPNESS_SCALE: f32 = 1000.;
/// 灰度标准差的归一化除数
const CONTRAST_SCALE: f32 = 128.;
/// 像素各通道方差的均值低于该值时视为灰度图
const GRAYSCALE_EPSILON: f32 = 1.;

/// 图片的描述性指标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStats {
    pub width_px: u32,
    pub height_px: u32,
    pub aspect_ratio: f32,
    pub format: String,
    pub file_size_bytes: u64,
    pub color_space: String,
    pub is_grayscale: bool,
    /// [0, 1]，越大越清晰
    pub sharpness_score: f32,
    /// [0, 1]
    pub contrast_score: f32,
    /// [0, 255]
    pub brightness_avg: f32,
    pub dominant_colors: Vec<DominantColor>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageAnalyzer {
    opts: AnalyzeOptions,
}

impl From<&AnalyzeOptions> for ImageAnalyzer {
    fn from(opts: &AnalyzeOptions) -> Self {
        Self { opts: opts.clone() }
    }
}

impl ImageAnalyzer {
    pub fn analyze(&self, image: &NormalizedImage) -> ImageStats {
        let (width, height) = image.dimensions();
        let gray = imageops::grayscale(&image.pixels);
        let (brightness, std) = mean_std(gray.as_raw().iter().map(|&p| p as f32));

        ImageStats {
            width_px: width,
            height_px: height,
            aspect_ratio: if height == 0 { 0. } else { width as f32 / height as f32 },
            format: image.format.clone(),
            file_size_bytes: image.source_bytes,
            color_space: image.color_space.clone(),
            is_grayscale: image.source_is_gray || channel_variance(image) < GRAYSCALE_EPSILON,
            sharpness_score: (laplacian_variance(&gray) / SHARPNESS_SCALE).min(1.),
            contrast_score: (std / CONTRAST_SCALE).min(1.),
            brightness_avg: brightness,
            dominant_colors: self.dominant_colors(image),
        }
    }

    /// 在缩小后的图片上对像素颜色做 k-means 聚类，按像素数量从多到少返回聚类中心
    pub fn dominant_colors(&self, image: &NormalizedImage) -> Vec<DominantColor> {
        let (width, height) = image.dimensions();
        let max_side = self.opts.color_max_side.max(1);
        let thumb;
        let pixels = if width > max_side || height > max_side {
            let scale = max_side as f32 / width.max(height) as f32;
            let w = ((width as f32 * scale).round() as u32).max(1);
            let h = ((height as f32 * scale).round() as u32).max(1);
            thumb = imageops::resize(&image.pixels, w, h, FilterType::Triangle);
            &thumb
        } else {
            &image.pixels
        };

        let data = pixels.pixels().map(|p| p.0.map(|c| c as f32)).collect::<Vec<_>>();
        let ks = kmeans(
            &data,
            self.opts.colors,
            self.opts.color_restarts,
            self.opts.color_max_iter,
            self.opts.color_seed,
        );
        ks.centroids
            .iter()
            .map(|c| DominantColor(c.map(|v| v.round().clamp(0., 255.) as u8)))
            .collect()
    }
}

/// 拉普拉斯算子 `[0 1 0; 1 -4 1; 0 1 0]` 响应的方差，边缘像素按复制边界处理
pub fn laplacian_variance(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return 0.;
    }
    let at = |x: i64, y: i64| {
        let x = x.clamp(0, w as i64 - 1) as u32;
        let y = y.clamp(0, h as i64 - 1) as u32;
        gray.get_pixel(x, y)[0] as f32
    };
    let responses = (0..h as i64).flat_map(|y| {
        (0..w as i64).map(move |x| {
            at(x, y - 1) + at(x - 1, y) + at(x + 1, y) + at(x, y + 1) - 4. * at(x, y)
        })
    });
    mean_std(responses).1.powi(2)
}

/// 每个像素三个通道的方差，在整张图上取均值
fn channel_variance(image: &NormalizedImage) -> f32 {
    let n = image.width() as usize * image.height() as usize;
    if n == 0 {
        return 0.;
    }
    let sum: f64 = image
        .pixels
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0.map(|c| c as f64);
            let m = (r + g + b) / 3.;
            ((r - m).powi(2) + (g - m).powi(2) + (b - m).powi(2)) / 3.
        })
        .sum();
    (sum / n as f64) as f32
}

/// 总体均值与标准差
fn mean_std(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let (mut n, mut sum, mut sum2) = (0u64, 0f64, 0f64);
    for v in values {
        n += 1;
        sum += v as f64;
        sum2 += (v as f64).powi(2);
    }
    if n == 0 {
        return (0., 0.);
    }
    let mean = sum / n as f64;
    let var = (sum2 / n as f64 - mean * mean).max(0.);
    (mean as f32, var.sqrt() as f32)
}
