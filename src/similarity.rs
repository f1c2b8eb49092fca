use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use clap::ValueEnum;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::{FusionOptions, HashOptions, QueryOptions};
use crate::embed::cosine_similarity;
use crate::error::{Error, Result};
use crate::hamming::{SimilarityTier, TierThresholds};
use crate::metrics;
use crate::record::{FeatureRecord, HashKind};
use crate::store::FeatureStore;

/// 每次取消检查之间处理的候选记录数
const SCAN_CHUNK_SIZE: usize = 1024;

/// 相似度计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// 三种感知哈希的加权平均
    Hash,
    /// 语义向量的余弦相似度
    Embedding,
    /// 哈希与语义向量的加权融合
    Combined,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hash => "hash",
            Self::Embedding => "embedding",
            Self::Combined => "combined",
        };
        f.write_str(s)
    }
}

/// 可在其他线程中取消正在进行的查询
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// 一条查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub item_id: String,
    /// [0, 1]，越大越相似
    pub score: f32,
    /// 实际参与计算分数的方法，只会是 `Hash` 或 `Embedding`
    pub methods: SmallVec<[Method; 2]>,
    pub hash_score: Option<f32>,
    pub embedding_score: Option<f32>,
    pub phash_distance: Option<u32>,
    pub tier: Option<SimilarityTier>,
}

/// 一组 pHash 相近的记录，第一个是种子记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// `(item_id, 与种子记录的 pHash 距离)`，按条目 ID 排序
    pub members: Vec<(String, u32)>,
}

/// 相似度排序引擎，对特征库做全量扫描
pub struct SimilarityEngine {
    store: Arc<dyn FeatureStore>,
    fusion: FusionOptions,
    thresholds: TierThresholds,
}

impl SimilarityEngine {
    pub fn new(store: Arc<dyn FeatureStore>, fusion: FusionOptions, hash: &HashOptions) -> Self {
        Self { store, fusion, thresholds: hash.thresholds() }
    }

    pub fn store(&self) -> &Arc<dyn FeatureStore> {
        &self.store
    }

    /// 根据特征库中已有的条目查找相似图片
    pub fn find_similar_to_item(
        &self,
        item_id: &str,
        opts: &QueryOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SimilarityHit>> {
        let query = self.store.find(item_id)?.ok_or_else(|| Error::NotFound(item_id.to_string()))?;
        self.find_similar(&query, opts, cancel)
    }

    /// 查找与 `query` 最相似的记录
    ///
    /// 结果按分数从高到低排列，分数相同时按条目 ID 升序，不包含 `query` 自身。
    /// 特征库为空时返回空列表。
    pub fn find_similar(
        &self,
        query: &FeatureRecord,
        opts: &QueryOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SimilarityHit>> {
        let method = opts.method;
        check_signal(query, method)?;

        let start = Instant::now();
        let deadline = opts.timeout().map(|t| start + t);
        let min_score = opts.min_score.unwrap_or(f32::NEG_INFINITY);
        let version_mismatch = AtomicUsize::new(0);
        let mut hits = vec![];

        self.store.scan(SCAN_CHUNK_SIZE, &mut |chunk| {
            if cancel.is_some_and(CancelToken::is_cancelled)
                || deadline.is_some_and(|d| Instant::now() >= d)
            {
                return Err(Error::Cancelled);
            }
            let scored = chunk
                .par_iter()
                .filter(|c| c.item_id != query.item_id)
                .map(|c| self.score(query, c, method, &version_mismatch))
                .collect::<Result<Vec<_>>>()?;
            hits.extend(scored.into_iter().flatten().filter(|h| h.score >= min_score));
            Ok(())
        })?;

        let skipped = version_mismatch.into_inner();
        if skipped > 0 {
            warn!("{skipped} 条记录的模型版本与查询不一致，未参与语义向量比较");
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.item_id.cmp(&b.item_id)));
        hits.truncate(opts.count);

        let elapsed = start.elapsed().as_secs_f32();
        debug!("{method} 查询耗时 {elapsed:.3}s，返回 {} 条结果", hits.len());
        metrics::inc_search_count(method);
        metrics::observe_search_duration(method, elapsed);
        if let Some(best) = hits.first() {
            metrics::observe_search_max_score(method, best.score);
        }

        Ok(hits)
    }

    /// 将 pHash 距离不超过 `max_distance` 的记录分组
    ///
    /// 按条目 ID 顺序，每条尚未分组的记录作为种子，吸收之后所有与它足够接近且未分组的记录。
    /// 只有一条记录的组不返回。
    pub fn find_duplicates(&self, max_distance: u32) -> Result<Vec<DuplicateGroup>> {
        let records = self
            .store
            .find_all()?
            .into_iter()
            .filter_map(|r| r.phash.map(|h| (r.item_id, h)))
            .collect::<Vec<_>>();
        let mut grouped = vec![false; records.len()];
        let mut groups = vec![];

        for i in 0..records.len() {
            if grouped[i] {
                continue;
            }
            let (seed_id, seed) = &records[i];
            let mut members = vec![(seed_id.clone(), 0)];
            for j in i + 1..records.len() {
                if grouped[j] {
                    continue;
                }
                let d = seed.distance(&records[j].1)?;
                if d <= max_distance {
                    grouped[j] = true;
                    members.push((records[j].0.clone(), d));
                }
            }
            if members.len() > 1 {
                groups.push(DuplicateGroup { members });
            }
        }

        debug!("在 {} 条记录中找到 {} 组重复图片", records.len(), groups.len());
        Ok(groups)
    }

    /// 计算单个候选的分数，没有可用特征时返回 `None`
    fn score(
        &self,
        query: &FeatureRecord,
        candidate: &FeatureRecord,
        method: Method,
        version_mismatch: &AtomicUsize,
    ) -> Result<Option<SimilarityHit>> {
        let (hash, phash_distance) = match method {
            Method::Hash | Method::Combined => self.hash_score(query, candidate)?,
            Method::Embedding => (None, None),
        };
        let embedding = match method {
            Method::Embedding | Method::Combined => {
                let score = embedding_score(query, candidate);
                if score.is_none() && is_version_mismatch(query, candidate) {
                    version_mismatch.fetch_add(1, Ordering::Relaxed);
                }
                score
            }
            Method::Hash => None,
        };

        let score = match method {
            Method::Hash => hash,
            Method::Embedding => embedding,
            Method::Combined => self.fuse(hash, embedding),
        };
        let Some(score) = score else {
            return Ok(None);
        };

        let mut methods = SmallVec::new();
        if hash.is_some() {
            methods.push(Method::Hash);
        }
        if embedding.is_some() {
            methods.push(Method::Embedding);
        }

        Ok(Some(SimilarityHit {
            item_id: candidate.item_id.clone(),
            score,
            methods,
            hash_score: hash,
            embedding_score: embedding,
            phash_distance,
            tier: phash_distance.map(|d| SimilarityTier::from_distance(d, &self.thresholds)),
        }))
    }

    /// 两条记录都有的哈希类型按权重取平均，同时返回 pHash 距离
    fn hash_score(
        &self,
        query: &FeatureRecord,
        candidate: &FeatureRecord,
    ) -> Result<(Option<f32>, Option<u32>)> {
        let mut sum = 0.;
        let mut weight_sum = 0.;
        let mut count = 0;
        let mut plain_sum = 0.;
        let mut phash_distance = None;

        for kind in HashKind::ALL {
            let (Some(q), Some(c)) = (query.hash(kind), candidate.hash(kind)) else {
                continue;
            };
            let d = q.distance(c)?;
            let sim = 1. - d as f32 / q.bit_len() as f32;
            let w = self.hash_weight(kind).max(0.);
            sum += w * sim;
            weight_sum += w;
            plain_sum += sim;
            count += 1;
            if kind == HashKind::Phash {
                phash_distance = Some(d);
            }
        }

        let score = match count {
            0 => None,
            // 权重全部为 0 时退化为算术平均
            _ if weight_sum <= 0. => Some(plain_sum / count as f32),
            _ => Some(sum / weight_sum),
        };
        Ok((score, phash_distance))
    }

    fn hash_weight(&self, kind: HashKind) -> f32 {
        match kind {
            HashKind::Phash => self.fusion.weight_phash,
            HashKind::Dhash => self.fusion.weight_dhash,
            HashKind::Ahash => self.fusion.weight_ahash,
        }
    }

    /// 按权重融合可用的分数，权重在可用的方法之间重新归一化
    fn fuse(&self, hash: Option<f32>, embedding: Option<f32>) -> Option<f32> {
        let wh = self.fusion.weight_hash.max(0.);
        let we = self.fusion.weight_embedding.max(0.);
        match (hash, embedding) {
            (Some(h), Some(e)) if wh + we > 0. => Some((wh * h + we * e) / (wh + we)),
            (Some(h), Some(e)) => Some((h + e) / 2.),
            (Some(s), None) | (None, Some(s)) => Some(s),
            (None, None) => None,
        }
    }
}

fn check_signal(query: &FeatureRecord, method: Method) -> Result<()> {
    let has_hash = query.has_hash();
    let has_embedding = query.semantic_embedding.is_some();
    let ok = match method {
        Method::Hash => has_hash,
        Method::Embedding => has_embedding,
        Method::Combined => has_hash || has_embedding,
    };
    if ok { Ok(()) } else { Err(Error::NoSignal(method)) }
}

fn is_version_mismatch(query: &FeatureRecord, candidate: &FeatureRecord) -> bool {
    candidate.semantic_embedding.is_some() && query.model_version != candidate.model_version
}

/// 余弦相似度截断到 [0, 1]，模型版本不同或任一方没有向量时返回 `None`
fn embedding_score(query: &FeatureRecord, candidate: &FeatureRecord) -> Option<f32> {
    if query.model_version != candidate.model_version {
        return None;
    }
    let (Some(q), Some(c)) = (&query.semantic_embedding, &candidate.semantic_embedding) else {
        return None;
    };
    cosine_similarity(q, c).map(|s| s.max(0.))
}
