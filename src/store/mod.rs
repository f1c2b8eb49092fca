mod lmdb;
mod memory;

pub use lmdb::LmdbStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::hamming::BitHash;
use crate::record::{FeatureRecord, HashKind};

/// 特征库，每个条目对应一条完整的特征记录
///
/// 所有实现都必须保证：
/// - `save` 整条覆盖旧记录，读者只会看到旧记录或新记录，不会看到一半
/// - 对不同条目的并发 `save` 互不影响
/// - 遍历顺序为条目 ID 的字节序
pub trait FeatureStore: Send + Sync {
    /// 插入或覆盖一条记录
    fn save(&self, record: &FeatureRecord) -> Result<()>;

    fn find(&self, item_id: &str) -> Result<Option<FeatureRecord>>;

    fn find_all(&self) -> Result<Vec<FeatureRecord>> {
        let mut records = vec![];
        self.scan(usize::MAX, &mut |chunk| {
            records.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(records)
    }

    /// 分页读取，按条目 ID 排序
    fn find_page(&self, offset: usize, limit: usize) -> Result<Vec<FeatureRecord>>;

    /// 查找指定哈希完全相同的记录
    fn find_by_hash(&self, hash: &BitHash, kind: HashKind) -> Result<Vec<FeatureRecord>>;

    /// 删除记录及其哈希索引，返回记录是否存在
    fn delete(&self, item_id: &str) -> Result<bool>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn contains(&self, item_id: &str) -> Result<bool> {
        Ok(self.find(item_id)?.is_some())
    }

    /// 在同一个快照上按块遍历所有记录，回调返回错误时停止遍历
    fn scan(
        &self,
        chunk_size: usize,
        f: &mut dyn FnMut(&[FeatureRecord]) -> Result<()>,
    ) -> Result<()>;
}
