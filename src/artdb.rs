use std::sync::Arc;

use indicatif::ProgressBar;
use log::info;

use crate::config::*;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::extract::{ExtractItem, ExtractionOrchestrator, ExtractionReport, FeatureExtractor};
use crate::hamming::BitHash;
use crate::record::{FeatureRecord, HashKind};
use crate::similarity::{CancelToken, DuplicateGroup, SimilarityEngine, SimilarityHit};
use crate::store::{FeatureStore, LmdbStore, MemoryStore};

pub struct ArtDBBuilder {
    conf_dir: ConfDir,
    in_memory: bool,
    hash: HashOptions,
    analyze: AnalyzeOptions,
    embed: EmbedOptions,
    extract: ExtractOptions,
    fusion: FusionOptions,
    embedder: Option<Arc<dyn Embedder>>,
}

impl ArtDBBuilder {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self {
            conf_dir,
            in_memory: false,
            hash: HashOptions::default(),
            analyze: AnalyzeOptions::default(),
            embed: EmbedOptions::default(),
            extract: ExtractOptions::default(),
            fusion: FusionOptions::default(),
            embedder: None,
        }
    }

    /// 不打开 LMDB，特征只保存在内存中
    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    pub fn hash(mut self, hash: HashOptions) -> Self {
        self.hash = hash;
        self
    }

    pub fn analyze(mut self, analyze: AnalyzeOptions) -> Self {
        self.analyze = analyze;
        self
    }

    pub fn embed(mut self, embed: EmbedOptions) -> Self {
        self.embed = embed;
        self
    }

    pub fn extract(mut self, extract: ExtractOptions) -> Self {
        self.extract = extract;
        self
    }

    pub fn fusion(mut self, fusion: FusionOptions) -> Self {
        self.fusion = fusion;
        self
    }

    /// 指定语义编码器，优先于 `--clip-model`
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn open(self) -> Result<ArtDB> {
        self.hash.validate()?;
        let store: Arc<dyn FeatureStore> = if self.in_memory {
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(LmdbStore::open(self.conf_dir.database())?)
        };

        let embedder = match self.embedder {
            Some(embedder) => Some(embedder),
            None => load_embedder(&self.embed)?,
        };
        if let Some(embedder) = &embedder {
            if embedder.dimension() != self.embed.embedding_dim {
                return Err(Error::EmbeddingUnavailable(format!(
                    "编码器维数 {} 与配置 {} 不一致",
                    embedder.dimension(),
                    self.embed.embedding_dim
                )));
            }
        }

        let extractor = Arc::new(FeatureExtractor::new(
            &self.hash,
            &self.analyze,
            &self.extract,
            &self.embed,
            embedder,
        ));
        let engine = SimilarityEngine::new(store.clone(), self.fusion, &self.hash);
        info!(
            "打开特征库：{} 条记录，模型版本 {}",
            store.len()?,
            extractor.model_version()
        );

        Ok(ArtDB {
            store,
            extractor,
            engine,
            batch_size: self.embed.embed_batch_size,
            overwrite: !self.extract.no_overwrite,
        })
    }
}

#[cfg(feature = "clip")]
fn load_embedder(opts: &EmbedOptions) -> Result<Option<Arc<dyn Embedder>>> {
    use crate::embed::ClipEmbedder;

    match &opts.clip_model {
        Some(path) => {
            let clip = ClipEmbedder::load(path, &opts.model_version, opts.embedding_dim)?;
            Ok(Some(Arc::new(clip)))
        }
        None => Ok(None),
    }
}

#[cfg(not(feature = "clip"))]
fn load_embedder(_opts: &EmbedOptions) -> Result<Option<Arc<dyn Embedder>>> {
    Ok(None)
}

/// 特征库与查询引擎的组合
pub struct ArtDB {
    store: Arc<dyn FeatureStore>,
    extractor: Arc<FeatureExtractor>,
    engine: SimilarityEngine,
    batch_size: usize,
    overwrite: bool,
}

impl ArtDB {
    /// 提取单张图片的特征并保存
    pub fn add_image(
        &self,
        item_id: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<FeatureRecord> {
        let record = self.extractor.extract(item_id, data, content_type)?;
        self.store.save(&record)?;
        Ok(record)
    }

    /// 批量提取特征，单张图片失败不会中断
    pub fn add_images(
        &self,
        items: &[ExtractItem],
        concurrency: usize,
        pb: Option<&ProgressBar>,
    ) -> ExtractionReport {
        ExtractionOrchestrator::new(
            self.extractor.clone(),
            self.store.clone(),
            self.batch_size,
            self.overwrite,
        )
        .extract_all(items, concurrency, pb)
    }

    pub fn find(&self, item_id: &str) -> Result<Option<FeatureRecord>> {
        self.store.find(item_id)
    }

    pub fn find_page(&self, offset: usize, limit: usize) -> Result<Vec<FeatureRecord>> {
        self.store.find_page(offset, limit)
    }

    pub fn find_by_hash(&self, hash: &BitHash, kind: HashKind) -> Result<Vec<FeatureRecord>> {
        self.store.find_by_hash(hash, kind)
    }

    pub fn delete(&self, item_id: &str) -> Result<bool> {
        self.store.delete(item_id)
    }

    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    /// 以特征库中的条目为查询
    pub fn search_item(
        &self,
        item_id: &str,
        opts: &QueryOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SimilarityHit>> {
        self.engine.find_similar_to_item(item_id, opts, cancel)
    }

    /// 以一张新图片为查询，图片本身不会写入特征库
    pub fn search_image(
        &self,
        data: &[u8],
        content_type: Option<&str>,
        opts: &QueryOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SimilarityHit>> {
        let query = self.extractor.extract("", data, content_type)?;
        self.engine.find_similar(&query, opts, cancel)
    }

    pub fn search_record(
        &self,
        query: &FeatureRecord,
        opts: &QueryOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SimilarityHit>> {
        self.engine.find_similar(query, opts, cancel)
    }

    pub fn duplicates(&self, max_distance: u32) -> Result<Vec<DuplicateGroup>> {
        self.engine.find_duplicates(max_distance)
    }
}
