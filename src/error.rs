use thiserror::Error;

use crate::similarity::Method;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// artsearch 的错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// 声明或嗅探到的内容类型不是图片
    #[error("不支持的图片格式: {0}")]
    UnsupportedFormat(String),
    /// 图片数据无法按对应格式解码
    #[error("图片解码失败: {0}")]
    Decode(#[source] image::ImageError),
    /// 解码后的像素数据超过上限
    #[error("图片过大: {size} 字节，上限 {limit} 字节")]
    Oversize { size: u64, limit: u64 },
    /// 语义编码器不可用，调用方可自行重试
    #[error("语义编码器不可用: {0}")]
    EmbeddingUnavailable(String),
    /// 比较了位长不同的哈希
    #[error("哈希位长不一致: {left} != {right}")]
    IncompatibleHashLength { left: usize, right: usize },
    /// 查询记录缺少所选方法需要的特征
    #[error("查询记录缺少 {0} 方法所需的特征")]
    NoSignal(Method),
    /// 特征库中没有该条目
    #[error("找不到条目: {0}")]
    NotFound(String),
    /// 查询被取消或超时
    #[error("查询已取消")]
    Cancelled,
    /// 配置参数不合法
    #[error("配置无效: {0}")]
    InvalidConfig(String),
    /// 特征库读写失败
    #[error("特征库错误: {0}")]
    Store(String),
    #[error("读取失败: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// 是否值得由调用方重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingUnavailable(_) | Self::Store(_) | Self::Io(_))
    }
}

impl From<heed::Error> for Error {
    fn from(err: heed::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Store(format!("记录编解码失败: {err}"))
    }
}
