use std::path::Path;
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use log::{debug, info};
use ndarray::Array4;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;

use super::{Embedder, finalize_embedding};
use crate::error::{Error, Result};
use crate::normalize::NormalizedImage;

/// CLIP 视觉编码器的输入边长
const INPUT_SIZE: u32 = 224;
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// 基于 ONNX Runtime 的 CLIP 视觉编码器
///
/// 模型在构造时加载，随实例释放
pub struct ClipEmbedder {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    model_version: String,
    dimension: usize,
}

impl ClipEmbedder {
    pub fn load(path: impl AsRef<Path>, model_version: &str, dimension: usize) -> Result<Self> {
        let path = path.as_ref();
        let unavailable = |e: ort::Error| Error::EmbeddingUnavailable(e.to_string());
        let session = Session::builder()
            .map_err(unavailable)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(unavailable)?
            .with_intra_threads(num_cpus::get())
            .map_err(unavailable)?
            .commit_from_file(path)
            .map_err(|e| Error::EmbeddingUnavailable(format!("{}: {e}", path.display())))?;

        let input_name =
            session.inputs.first().map(|i| i.name.clone()).unwrap_or_else(|| "pixel_values".into());
        let output_name =
            session.outputs.first().map(|o| o.name.clone()).unwrap_or_else(|| "image_embeds".into());
        info!("加载 CLIP 模型: {}，输入 {input_name}，输出 {output_name}", path.display());

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            model_version: model_version.to_string(),
            dimension,
        })
    }

    /// 短边缩放到 224 后居中裁剪，按 CLIP 的均值和方差标准化，写入 NCHW 张量的第 `n` 张
    fn preprocess(image: &NormalizedImage, array: &mut Array4<f32>, n: usize) {
        let (w, h) = image.dimensions();
        let scale = INPUT_SIZE as f32 / w.min(h).max(1) as f32;
        let new_w = ((w as f32 * scale).round() as u32).max(INPUT_SIZE);
        let new_h = ((h as f32 * scale).round() as u32).max(INPUT_SIZE);
        let resized = imageops::resize(&image.pixels, new_w, new_h, FilterType::Triangle);
        let x0 = (new_w - INPUT_SIZE) / 2;
        let y0 = (new_h - INPUT_SIZE) / 2;

        for y in 0..INPUT_SIZE {
            for x in 0..INPUT_SIZE {
                let pixel = resized.get_pixel(x0 + x, y0 + y);
                for c in 0..3 {
                    array[[n, c, y as usize, x as usize]] =
                        (pixel[c] as f32 / 255. - CLIP_MEAN[c]) / CLIP_STD[c];
                }
            }
        }
    }

    fn run(&self, images: &[&NormalizedImage]) -> Result<Vec<Vec<f32>>> {
        let size = INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((images.len(), 3, size, size));
        for (n, image) in images.iter().enumerate() {
            Self::preprocess(image, &mut input, n);
        }
        let tensor = Tensor::from_array(input).map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;

        let mut session =
            self.session.lock().map_err(|_| Error::EmbeddingUnavailable("模型锁已损坏".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;
        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| Error::EmbeddingUnavailable(format!("模型没有输出 {}", self.output_name)))?;
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;

        if data.len() != images.len() * self.dimension {
            return Err(Error::EmbeddingUnavailable(format!(
                "模型输出大小错误: {} != {} x {}",
                data.len(),
                images.len(),
                self.dimension
            )));
        }
        debug!("CLIP 推理完成，共 {} 张图片", images.len());
        Ok(data.chunks(self.dimension).map(|c| c.to_vec()).collect())
    }
}

impl Embedder for ClipEmbedder {
    fn model_version(&self) -> &str {
        &self.model_version
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, image: &NormalizedImage) -> Result<Vec<f32>> {
        let mut out = self.run(&[image])?;
        let v = out.pop().ok_or_else(|| Error::EmbeddingUnavailable("模型没有输出".into()))?;
        finalize_embedding(v, self.dimension)
    }

    fn embed_batch(&self, images: &[&NormalizedImage]) -> Vec<Result<Vec<f32>>> {
        if images.is_empty() {
            return vec![];
        }
        match self.run(images) {
            Ok(out) => out.into_iter().map(|v| finalize_embedding(v, self.dimension)).collect(),
            // 整批失败时逐张重试，区分出真正失败的图片
            Err(e) => {
                debug!("批量推理失败，逐张重试: {e}");
                images.iter().map(|image| self.embed(image)).collect()
            }
        }
    }
}
