use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::analyze::{ImageAnalyzer, ImageStats};
use crate::config::{AnalyzeOptions, EmbedOptions, ExtractOptions, HashOptions};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::metrics;
use crate::normalize::{ImageNormalizer, NormalizedImage};
use crate::phash::{ImageHashes, PerceptualHasher};
use crate::record::FeatureRecord;
use crate::store::FeatureStore;

/// 待提取图片的来源
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes { data: Vec<u8>, content_type: Option<String> },
    Path(PathBuf),
}

impl ImageSource {
    /// 读取原始数据，文件超过 `max_input_bytes` 时不读入内存
    fn load(&self, max_input_bytes: u64) -> Result<(std::borrow::Cow<'_, [u8]>, Option<&str>)> {
        match self {
            Self::Bytes { data, content_type } => Ok((data.into(), content_type.as_deref())),
            Self::Path(path) => {
                let size = std::fs::metadata(path)?.len();
                if size > max_input_bytes {
                    return Err(Error::Oversize { size, limit: max_input_bytes });
                }
                Ok((std::fs::read(path)?.into(), None))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractItem {
    pub item_id: String,
    pub source: ImageSource,
}

impl ExtractItem {
    pub fn from_path(item_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { item_id: item_id.into(), source: ImageSource::Path(path.into()) }
    }

    pub fn from_bytes(item_id: impl Into<String>, data: Vec<u8>, content_type: Option<&str>) -> Self {
        Self {
            item_id: item_id.into(),
            source: ImageSource::Bytes { data, content_type: content_type.map(str::to_string) },
        }
    }
}

/// 单张图片的特征提取流水线：解码 -> 哈希 / 指标 / 语义向量
pub struct FeatureExtractor {
    normalizer: ImageNormalizer,
    hasher: PerceptualHasher,
    analyzer: ImageAnalyzer,
    embedder: Option<Arc<dyn Embedder>>,
    model_version: String,
}

/// 完成了除语义向量以外所有步骤的中间结果
struct Prepared {
    item_id: String,
    image: NormalizedImage,
    hashes: ImageHashes,
    stats: ImageStats,
}

impl FeatureExtractor {
    pub fn new(
        hash: &HashOptions,
        analyze: &AnalyzeOptions,
        extract: &ExtractOptions,
        embed: &EmbedOptions,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let model_version = match &embedder {
            Some(e) => e.model_version().to_string(),
            None => embed.model_version.clone(),
        };
        Self {
            normalizer: ImageNormalizer::from(extract),
            hasher: PerceptualHasher::from(hash),
            analyzer: ImageAnalyzer::from(analyze),
            embedder,
            model_version,
        }
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// 提取一张图片的全部特征
    pub fn extract(
        &self,
        item_id: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<FeatureRecord> {
        let prepared = self.prepare(item_id, data, content_type)?;
        let embedding = match &self.embedder {
            Some(embedder) => Some(embedder.embed(&prepared.image)?),
            None => None,
        };
        Ok(self.finish(prepared, embedding))
    }

    fn prepare(&self, item_id: &str, data: &[u8], content_type: Option<&str>) -> Result<Prepared> {
        let start = Instant::now();
        let image = self.normalizer.normalize(data, content_type)?;
        let hashes = self.hasher.hash(&image);
        let stats = self.analyzer.analyze(&image);
        metrics::observe_extract_duration(image.dimensions(), start.elapsed().as_secs_f32());
        Ok(Prepared { item_id: item_id.to_string(), image, hashes, stats })
    }

    fn finish(&self, prepared: Prepared, embedding: Option<Vec<f32>>) -> FeatureRecord {
        let Prepared { item_id, hashes, stats, .. } = prepared;
        FeatureRecord {
            item_id,
            phash: Some(hashes.phash),
            dhash: Some(hashes.dhash),
            ahash: Some(hashes.ahash),
            semantic_embedding: embedding,
            width_px: stats.width_px,
            height_px: stats.height_px,
            aspect_ratio: stats.aspect_ratio,
            format: stats.format,
            file_size_bytes: stats.file_size_bytes,
            color_space: stats.color_space,
            is_grayscale: stats.is_grayscale,
            sharpness_score: stats.sharpness_score,
            contrast_score: stats.contrast_score,
            brightness_avg: stats.brightness_avg,
            dominant_colors: stats.dominant_colors,
            model_version: self.model_version.clone(),
            extraction_timestamp: Utc::now(),
        }
    }
}

/// 批量提取的结果
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub succeeded: usize,
    /// 已有记录且未要求覆盖而跳过的条目数
    pub skipped: usize,
    /// 按输入顺序排列的失败条目及原因
    pub failed: Vec<(String, Error)>,
}

impl ExtractionReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed.len()
    }
}

enum Outcome {
    Succeeded,
    Skipped,
    Failed(Error),
}

/// 批量特征提取，单个条目失败不影响其他条目
pub struct ExtractionOrchestrator {
    extractor: Arc<FeatureExtractor>,
    store: Arc<dyn FeatureStore>,
    batch_size: usize,
    overwrite: bool,
}

impl ExtractionOrchestrator {
    pub fn new(
        extractor: Arc<FeatureExtractor>,
        store: Arc<dyn FeatureStore>,
        batch_size: usize,
        overwrite: bool,
    ) -> Self {
        Self { extractor, store, batch_size: batch_size.max(1), overwrite }
    }

    /// 提取所有条目的特征并写入特征库
    ///
    /// 最多同时处理 `concurrency` 张图片。重复运行是安全的：已有记录会被整条覆盖，
    /// 或在 `overwrite` 为 false 时跳过。
    pub fn extract_all(
        &self,
        items: &[ExtractItem],
        concurrency: usize,
        pb: Option<&ProgressBar>,
    ) -> ExtractionReport {
        let start = Instant::now();
        let concurrency = concurrency.max(1);
        let run = || self.run(items, concurrency, pb);
        let report = match rayon::ThreadPoolBuilder::new().num_threads(concurrency).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                warn!("创建线程池失败，使用全局线程池: {e}");
                run()
            }
        };
        info!(
            "特征提取完成：成功 {}，跳过 {}，失败 {}，耗时 {:.2}s",
            report.succeeded,
            report.skipped,
            report.failed.len(),
            start.elapsed().as_secs_f32()
        );
        report
    }

    fn run(
        &self,
        items: &[ExtractItem],
        concurrency: usize,
        pb: Option<&ProgressBar>,
    ) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        // 每块至少包含一个完整的编码批次，同时让所有线程都有事可做
        let chunk_size = self.batch_size.max(concurrency);

        for chunk in items.chunks(chunk_size) {
            let outcomes = self.run_chunk(chunk);
            for (item, outcome) in chunk.iter().zip(outcomes) {
                match outcome {
                    Outcome::Succeeded => {
                        report.succeeded += 1;
                        metrics::inc_extract_count("succeeded");
                        if let Some(pb) = pb {
                            pb.set_message(item.item_id.clone());
                        }
                    }
                    Outcome::Skipped => {
                        report.skipped += 1;
                        metrics::inc_extract_count("skipped");
                        if let Some(pb) = pb {
                            pb.set_message(format!("跳过图片: {}", item.item_id));
                        }
                    }
                    Outcome::Failed(e) => {
                        metrics::inc_extract_count("failed");
                        match pb {
                            Some(pb) => pb.println(format!("提取特征失败: {}: {e}", item.item_id)),
                            None => debug!("提取特征失败: {}: {e}", item.item_id),
                        }
                        report.failed.push((item.item_id.clone(), e));
                    }
                }
                if let Some(pb) = pb {
                    pb.inc(1);
                }
            }
        }

        report
    }

    /// 处理一块条目，返回与输入顺序一致的结果
    fn run_chunk(&self, chunk: &[ExtractItem]) -> Vec<Outcome> {
        // 1. 解码、哈希与指标计算
        let prepared = chunk
            .par_iter()
            .map(|item| -> Result<Option<Prepared>> {
                if !self.overwrite && self.store.contains(&item.item_id)? {
                    return Ok(None);
                }
                let (data, content_type) =
                    item.source.load(self.extractor.normalizer.max_input_bytes())?;
                self.extractor.prepare(&item.item_id, &data, content_type).map(Some)
            })
            .collect::<Vec<_>>();

        // 2. 按批次计算语义向量
        let mut embeddings: Vec<Option<Result<Vec<f32>>>> = prepared.iter().map(|_| None).collect();
        if let Some(embedder) = &self.extractor.embedder {
            let ready = prepared
                .iter()
                .enumerate()
                .filter_map(|(i, p)| match p {
                    Ok(Some(p)) => Some((i, &p.image)),
                    _ => None,
                })
                .collect::<Vec<_>>();
            for batch in ready.chunks(self.batch_size) {
                let images = batch.iter().map(|(_, image)| *image).collect::<Vec<_>>();
                let results = embedder.embed_batch(&images);
                if results.len() != batch.len() {
                    // 编码器实现错误，整批按失败处理
                    for (i, _) in batch {
                        embeddings[*i] = Some(Err(Error::EmbeddingUnavailable(format!(
                            "编码器返回了 {} 个结果，应为 {}",
                            results.len(),
                            batch.len()
                        ))));
                    }
                    continue;
                }
                for ((i, _), r) in batch.iter().zip(results) {
                    embeddings[*i] = Some(r);
                }
            }
        }

        // 3. 写入特征库
        prepared
            .into_par_iter()
            .zip(embeddings)
            .map(|(p, embedding)| {
                let p = match p {
                    Ok(Some(p)) => p,
                    Ok(None) => return Outcome::Skipped,
                    Err(e) => return Outcome::Failed(e),
                };
                let embedding = match embedding.transpose() {
                    Ok(v) => v,
                    Err(e) => return Outcome::Failed(e),
                };
                let record = self.extractor.finish(p, embedding);
                match self.store.save(&record) {
                    Ok(()) => Outcome::Succeeded,
                    Err(e) => Outcome::Failed(e),
                }
            })
            .collect()
    }
}
