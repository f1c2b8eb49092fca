use std::io::Cursor;

use image::{ColorType, DynamicImage, ImageFormat, ImageReader, RgbImage};
use log::debug;

use crate::config::ExtractOptions;
use crate::error::{Error, Result};

/// 解码后的图片，像素统一为 8 位 RGB
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub pixels: RgbImage,
    /// 原图格式，例如 `png`、`jpeg`
    pub format: String,
    /// 原始编码数据的大小
    pub source_bytes: u64,
    /// 原图色彩模式，例如 `RGB`、`RGBA`、`L`
    pub color_space: String,
    /// 原图是否为单通道灰度图
    pub source_is_gray: bool,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.pixels.clone())
    }
}

/// 图片解码器，只检查大小限制，不做缩放
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    max_input_bytes: u64,
    max_decoded_bytes: u64,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::from(&ExtractOptions::default())
    }
}

impl From<&ExtractOptions> for ImageNormalizer {
    fn from(opts: &ExtractOptions) -> Self {
        Self { max_input_bytes: opts.max_input_bytes, max_decoded_bytes: opts.max_decoded_bytes }
    }
}

impl ImageNormalizer {
    pub fn new(max_input_bytes: u64, max_decoded_bytes: u64) -> Self {
        Self { max_input_bytes, max_decoded_bytes }
    }

    pub fn max_input_bytes(&self) -> u64 {
        self.max_input_bytes
    }

    /// 解码图片
    ///
    /// # Arguments
    ///
    /// * `data` - 原始编码数据
    /// * `content_type` - 调用方声明的 MIME 类型，为 `None` 时只根据数据嗅探
    pub fn normalize(&self, data: &[u8], content_type: Option<&str>) -> Result<NormalizedImage> {
        if let Some(ct) = content_type {
            if !ct.trim().to_ascii_lowercase().starts_with("image/") {
                return Err(Error::UnsupportedFormat(ct.to_string()));
            }
        }

        let source_bytes = data.len() as u64;
        if source_bytes > self.max_input_bytes {
            return Err(Error::Oversize { size: source_bytes, limit: self.max_input_bytes });
        }

        let format = image::guess_format(data)
            .map_err(|_| Error::UnsupportedFormat(content_type.unwrap_or("unknown").to_string()))?;

        // 先读取尺寸，避免为超大图片分配内存
        let mut reader = ImageReader::new(Cursor::new(data));
        reader.set_format(format);
        let (width, height) = reader.into_dimensions().map_err(Error::Decode)?;
        let decoded = width as u64 * height as u64 * 3;
        if decoded > self.max_decoded_bytes {
            return Err(Error::Oversize { size: decoded, limit: self.max_decoded_bytes });
        }

        let image = image::load_from_memory_with_format(data, format).map_err(Error::Decode)?;
        let color = image.color();
        debug!("decoded {format:?} image {width}x{height} {color:?}");

        Ok(NormalizedImage {
            pixels: image.to_rgb8(),
            format: format_name(format),
            source_bytes,
            color_space: color_space_name(color).to_string(),
            source_is_gray: !color.has_color(),
        })
    }
}

fn format_name(format: ImageFormat) -> String {
    format!("{format:?}").to_lowercase()
}

fn color_space_name(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 | ColorType::L16 => "L",
        ColorType::La8 | ColorType::La16 => "LA",
        ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => "RGB",
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => "RGBA",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma, Rgb};

    use super::*;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(vec![]);
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_normalize_png() {
        let img = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, 7]));
        let data = encode(DynamicImage::ImageRgb8(img.clone()), ImageFormat::Png);

        let n = ImageNormalizer::default().normalize(&data, Some("image/png")).unwrap();
        assert_eq!(n.dimensions(), (40, 30));
        assert_eq!(n.format, "png");
        assert_eq!(n.color_space, "RGB");
        assert_eq!(n.source_bytes, data.len() as u64);
        assert!(!n.source_is_gray);
        assert_eq!(n.pixels, img);
    }

    #[test]
    fn test_normalize_gray_sniffed() {
        let img = GrayImage::from_pixel(8, 8, Luma([100]));
        let data = encode(DynamicImage::ImageLuma8(img), ImageFormat::Png);

        let n = ImageNormalizer::default().normalize(&data, None).unwrap();
        assert_eq!(n.color_space, "L");
        assert!(n.source_is_gray);
        assert_eq!(n.pixels.get_pixel(3, 3), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = ImageNormalizer::default().normalize(b"hello", Some("text/plain")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        let err = ImageNormalizer::default().normalize(b"hello", None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_truncated_data() {
        let img = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * y) as u8, (x ^ y) as u8, x as u8]));
        let data = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);
        let err = ImageNormalizer::default().normalize(&data[..data.len() / 2], None).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_oversize() {
        let img = RgbImage::from_pixel(100, 100, Rgb([1, 2, 3]));
        let data = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let err = ImageNormalizer::new(u64::MAX, 100 * 100 * 3 - 1).normalize(&data, None);
        assert!(matches!(err, Err(Error::Oversize { size: 30000, .. })));
        let err = ImageNormalizer::new(10, u64::MAX).normalize(&data, None);
        assert!(matches!(err, Err(Error::Oversize { limit: 10, .. })));
        assert!(ImageNormalizer::new(u64::MAX, 100 * 100 * 3).normalize(&data, None).is_ok());
    }
}
