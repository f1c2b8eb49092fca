use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::hamming::TierThresholds;
use crate::similarity::Method;

/// 哈希网格边长，8 对应 64 位哈希
pub const DEFAULT_HASH_SIZE: u32 = 8;
/// pHash 的 DCT 输入网格相对于哈希网格的放大倍数
pub const PHASH_DCT_FACTOR: u32 = 4;

pub const DEFAULT_TIER_IDENTICAL: u32 = 5;
pub const DEFAULT_TIER_VERY_SIMILAR: u32 = 10;
pub const DEFAULT_TIER_SIMILAR: u32 = 15;
pub const DEFAULT_TIER_SOMEWHAT_SIMILAR: u32 = 20;

pub const DEFAULT_WEIGHT_PHASH: f32 = 0.5;
pub const DEFAULT_WEIGHT_DHASH: f32 = 0.3;
pub const DEFAULT_WEIGHT_AHASH: f32 = 0.2;
pub const DEFAULT_WEIGHT_HASH: f32 = 0.5;
pub const DEFAULT_WEIGHT_EMBEDDING: f32 = 0.5;

pub const DEFAULT_EMBEDDING_DIM: usize = 512;
pub const DEFAULT_MODEL_VERSION: &str = "v1.0.0";
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 16;

pub const DEFAULT_COLORS: usize = 5;
pub const DEFAULT_COLOR_SEED: u64 = 42;
pub const DEFAULT_COLOR_RESTARTS: usize = 3;
pub const DEFAULT_COLOR_MAX_ITER: usize = 100;
pub const DEFAULT_COLOR_MAX_SIDE: u32 = 300;

/// 输入文件大小上限：10M
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 10 << 20;
/// 解码后像素数据大小上限：256M
pub const DEFAULT_MAX_DECODED_BYTES: u64 = 256 << 20;

static CONF_DIR: LazyLock<String> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "artsearch", "artsearch").expect("failed to get project dir");
    proj_dirs.config_dir().to_string_lossy().into_owned()
});

fn default_config_dir() -> &'static str {
    CONF_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct HashOptions {
    /// 哈希网格边长，哈希位长为其平方，必须是 4 的倍数
    #[arg(long, value_name = "N", default_value_t = DEFAULT_HASH_SIZE, value_parser = parse_hash_size)]
    pub hash_size: u32,
    /// 汉明距离不超过该值视为 identical
    #[arg(long, value_name = "BITS", default_value_t = DEFAULT_TIER_IDENTICAL)]
    pub tier_identical: u32,
    /// 汉明距离不超过该值视为 very_similar
    #[arg(long, value_name = "BITS", default_value_t = DEFAULT_TIER_VERY_SIMILAR)]
    pub tier_very_similar: u32,
    /// 汉明距离不超过该值视为 similar
    #[arg(long, value_name = "BITS", default_value_t = DEFAULT_TIER_SIMILAR)]
    pub tier_similar: u32,
    /// 汉明距离不超过该值视为 somewhat_similar
    #[arg(long, value_name = "BITS", default_value_t = DEFAULT_TIER_SOMEWHAT_SIMILAR)]
    pub tier_somewhat_similar: u32,
}

impl HashOptions {
    /// 检查不经过命令行解析构造的配置
    pub fn validate(&self) -> crate::Result<()> {
        check_hash_size(self.hash_size).map_err(crate::Error::InvalidConfig)?;
        Ok(())
    }

    pub fn bit_len(&self) -> usize {
        (self.hash_size * self.hash_size) as usize
    }

    pub fn thresholds(&self) -> TierThresholds {
        TierThresholds {
            identical: self.tier_identical,
            very_similar: self.tier_very_similar,
            similar: self.tier_similar,
            somewhat_similar: self.tier_somewhat_similar,
        }
    }
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            hash_size: DEFAULT_HASH_SIZE,
            tier_identical: DEFAULT_TIER_IDENTICAL,
            tier_very_similar: DEFAULT_TIER_VERY_SIMILAR,
            tier_similar: DEFAULT_TIER_SIMILAR,
            tier_somewhat_similar: DEFAULT_TIER_SOMEWHAT_SIMILAR,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct FusionOptions {
    /// 合并三种哈希分数时 pHash 的权重
    #[arg(long, value_name = "W", default_value_t = DEFAULT_WEIGHT_PHASH)]
    pub weight_phash: f32,
    /// 合并三种哈希分数时 dHash 的权重
    #[arg(long, value_name = "W", default_value_t = DEFAULT_WEIGHT_DHASH)]
    pub weight_dhash: f32,
    /// 合并三种哈希分数时 aHash 的权重
    #[arg(long, value_name = "W", default_value_t = DEFAULT_WEIGHT_AHASH)]
    pub weight_ahash: f32,
    /// combined 模式下哈希分数的权重
    #[arg(long, value_name = "W", default_value_t = DEFAULT_WEIGHT_HASH)]
    pub weight_hash: f32,
    /// combined 模式下语义向量分数的权重
    #[arg(long, value_name = "W", default_value_t = DEFAULT_WEIGHT_EMBEDDING)]
    pub weight_embedding: f32,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            weight_phash: DEFAULT_WEIGHT_PHASH,
            weight_dhash: DEFAULT_WEIGHT_DHASH,
            weight_ahash: DEFAULT_WEIGHT_AHASH,
            weight_hash: DEFAULT_WEIGHT_HASH,
            weight_embedding: DEFAULT_WEIGHT_EMBEDDING,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct AnalyzeOptions {
    /// 提取的主色数量（k-means 的 k）
    #[arg(long, value_name = "K", default_value_t = DEFAULT_COLORS)]
    pub colors: usize,
    /// k-means 随机种子
    #[arg(long, value_name = "SEED", default_value_t = DEFAULT_COLOR_SEED)]
    pub color_seed: u64,
    /// k-means 重启次数，取总距离最小的一次
    #[arg(long, value_name = "N", default_value_t = DEFAULT_COLOR_RESTARTS)]
    pub color_restarts: usize,
    /// k-means 最大迭代次数
    #[arg(long, value_name = "N", default_value_t = DEFAULT_COLOR_MAX_ITER)]
    pub color_max_iter: usize,
    /// 主色分析前将图片缩放到的最大边长
    #[arg(long, value_name = "PX", default_value_t = DEFAULT_COLOR_MAX_SIDE)]
    pub color_max_side: u32,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            colors: DEFAULT_COLORS,
            color_seed: DEFAULT_COLOR_SEED,
            color_restarts: DEFAULT_COLOR_RESTARTS,
            color_max_iter: DEFAULT_COLOR_MAX_ITER,
            color_max_side: DEFAULT_COLOR_MAX_SIDE,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct EmbedOptions {
    /// 语义向量维数
    #[arg(long, value_name = "N", default_value_t = DEFAULT_EMBEDDING_DIM)]
    pub embedding_dim: usize,
    /// 未加载语义编码器时写入记录的算法版本
    #[arg(long, value_name = "VERSION", default_value = DEFAULT_MODEL_VERSION)]
    pub model_version: String,
    /// 每批送入编码器的图片数量
    #[arg(long, value_name = "N", default_value_t = DEFAULT_EMBED_BATCH_SIZE)]
    pub embed_batch_size: usize,
    /// CLIP 视觉编码器 ONNX 模型路径
    #[cfg(feature = "clip")]
    #[arg(long, value_name = "FILE")]
    pub clip_model: Option<PathBuf>,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            #[cfg(feature = "clip")]
            clip_model: None,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractOptions {
    /// 同时处理的图片数量
    #[arg(short = 'j', long, value_name = "N", default_value_t = num_cpus::get())]
    pub concurrency: usize,
    /// 输入文件大小上限
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_INPUT_BYTES)]
    pub max_input_bytes: u64,
    /// 解码后像素数据大小上限
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_DECODED_BYTES)]
    pub max_decoded_bytes: u64,
    /// 已有特征记录的条目直接跳过，而不是重新提取
    #[arg(long)]
    pub no_overwrite: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            max_decoded_bytes: DEFAULT_MAX_DECODED_BYTES,
            no_overwrite: false,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct QueryOptions {
    /// 相似度计算方式
    #[arg(short, long, value_enum, default_value_t = Method::Combined)]
    pub method: Method,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 10)]
    pub count: usize,
    /// 分数低于该值的结果会被丢弃
    #[arg(long, value_name = "SCORE")]
    pub min_score: Option<f32>,
    /// 查询超时，单位为毫秒
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

impl QueryOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { method: Method::Combined, count: 10, min_score: None, timeout_ms: None }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "artsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// artsearch 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取目录中所有图片的特征并写入特征库
    Extract(ExtractCommand),
    /// 搜索相似图片
    Search(SearchCommand),
    /// 显示一条特征记录
    Show(ShowCommand),
    /// 按 pHash 查找重复图片
    Duplicates(DuplicatesCommand),
    /// 删除一条特征记录
    Delete(DeleteCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回特征库（LMDB 目录）的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("features.mdb")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn check_hash_size(n: u32) -> Result<u32, String> {
    if n == 0 || n % 4 != 0 {
        return Err(format!("哈希尺寸必须是 4 的正整数倍: {n}"));
    }
    Ok(n)
}

fn parse_hash_size(s: &str) -> Result<u32, String> {
    let n: u32 = s.parse().map_err(|e| format!("无效的哈希尺寸 {s}: {e}"))?;
    check_hash_size(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hash_size() {
        assert_eq!(parse_hash_size("8"), Ok(8));
        assert_eq!(parse_hash_size("16"), Ok(16));
        assert!(parse_hash_size("6").is_err());
        assert!(parse_hash_size("0").is_err());
        assert!(parse_hash_size("x").is_err());
    }

    #[test]
    fn test_validate_hash_options() {
        assert!(HashOptions::default().validate().is_ok());
        for hash_size in [0, 6, 9] {
            let opts = HashOptions { hash_size, ..Default::default() };
            assert!(matches!(opts.validate(), Err(crate::Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_defaults_match_cli() {
        // Default 实现与命令行默认值必须一致
        let opts = HashOptions::parse_from(["test"]);
        let default = HashOptions::default();
        assert_eq!(opts.hash_size, default.hash_size);
        assert_eq!(opts.thresholds(), default.thresholds());
        assert_eq!(default.bit_len(), 64);

        let opts = AnalyzeOptions::parse_from(["test"]);
        assert_eq!(opts.colors, AnalyzeOptions::default().colors);
        assert_eq!(opts.color_seed, AnalyzeOptions::default().color_seed);

        let opts = QueryOptions::parse_from(["test", "--method", "hash", "--timeout-ms", "50"]);
        assert_eq!(opts.method, Method::Hash);
        assert_eq!(opts.timeout(), Some(Duration::from_millis(50)));
    }
}
