use std::path::Path;

use heed::types::{Bytes, Str, Unit};
use heed::{Database, Env, EnvOpenOptions, RwTxn, WithTls};
use log::debug;

use super::FeatureStore;
use crate::error::{Error, Result};
use crate::hamming::BitHash;
use crate::record::{FeatureRecord, HashKind};

/// 基于 LMDB 的特征库
///
/// - `records`：条目 ID -> bincode 编码的 [`FeatureRecord`]
/// - `hashes`：`[类型, 哈希字节数(u16 BE), 哈希, 条目 ID]` -> ()，用于按哈希精确查找
///
/// 每次写入都在单个写事务中完成，LMDB 同时只允许一个写事务，读事务总是看到完整的快照
pub struct LmdbStore {
    env: Env<WithTls>,
    records: Database<Str, Bytes>,
    hashes: Database<Bytes, Unit>,
}

impl LmdbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1 << 40) // 此处直接分配 1TiB 大小，实际占用随数据增长
                .max_dbs(2)
                .open(path)?
        };
        let mut txn = env.write_txn()?;
        let records = env.create_database::<Str, Bytes>(&mut txn, Some("records"))?;
        let hashes = env.create_database::<Bytes, Unit>(&mut txn, Some("hashes"))?;
        txn.commit()?;
        debug!("打开特征库: {}", path.display());
        Ok(Self { env, records, hashes })
    }

    fn get_in(&self, txn: &RwTxn, item_id: &str) -> Result<Option<FeatureRecord>> {
        self.records.get(txn, item_id)?.map(FeatureRecord::decode).transpose()
    }

    fn unindex(&self, txn: &mut RwTxn, record: &FeatureRecord) -> Result<()> {
        for kind in HashKind::ALL {
            if let Some(hash) = record.hash(kind) {
                self.hashes.delete(txn, &index_key(kind, hash, &record.item_id))?;
            }
        }
        Ok(())
    }
}

fn hash_prefix(kind: HashKind, hash: &BitHash) -> Vec<u8> {
    let bytes = hash.as_bytes();
    let mut key = Vec::with_capacity(3 + bytes.len());
    key.push(kind.tag());
    key.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    key.extend_from_slice(bytes);
    key
}

fn index_key(kind: HashKind, hash: &BitHash, item_id: &str) -> Vec<u8> {
    let mut key = hash_prefix(kind, hash);
    key.extend_from_slice(item_id.as_bytes());
    key
}

impl FeatureStore for LmdbStore {
    fn save(&self, record: &FeatureRecord) -> Result<()> {
        let data = record.encode()?;
        let mut txn = self.env.write_txn()?;
        if let Some(old) = self.get_in(&txn, &record.item_id)? {
            self.unindex(&mut txn, &old)?;
        }
        self.records.put(&mut txn, &record.item_id, &data)?;
        for kind in HashKind::ALL {
            if let Some(hash) = record.hash(kind) {
                self.hashes.put(&mut txn, &index_key(kind, hash, &record.item_id), &())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn find(&self, item_id: &str) -> Result<Option<FeatureRecord>> {
        let txn = self.env.read_txn()?;
        self.records.get(&txn, item_id)?.map(FeatureRecord::decode).transpose()
    }

    fn find_page(&self, offset: usize, limit: usize) -> Result<Vec<FeatureRecord>> {
        let txn = self.env.read_txn()?;
        self.records
            .iter(&txn)?
            .skip(offset)
            .take(limit)
            .map(|item| FeatureRecord::decode(item?.1))
            .collect()
    }

    fn find_by_hash(&self, hash: &BitHash, kind: HashKind) -> Result<Vec<FeatureRecord>> {
        let prefix = hash_prefix(kind, hash);
        let txn = self.env.read_txn()?;
        let mut result = vec![];
        for item in self.hashes.prefix_iter(&txn, &prefix)? {
            let (key, _) = item?;
            let item_id = std::str::from_utf8(&key[prefix.len()..])
                .map_err(|e| Error::Store(format!("哈希索引损坏: {e}")))?;
            if let Some(data) = self.records.get(&txn, item_id)? {
                result.push(FeatureRecord::decode(data)?);
            }
        }
        Ok(result)
    }

    fn delete(&self, item_id: &str) -> Result<bool> {
        let mut txn = self.env.write_txn()?;
        let Some(old) = self.get_in(&txn, item_id)? else {
            return Ok(false);
        };
        self.unindex(&mut txn, &old)?;
        self.records.delete(&mut txn, item_id)?;
        txn.commit()?;
        Ok(true)
    }

    fn len(&self) -> Result<usize> {
        let txn = self.env.read_txn()?;
        Ok(self.records.len(&txn)? as usize)
    }

    fn scan(
        &self,
        chunk_size: usize,
        f: &mut dyn FnMut(&[FeatureRecord]) -> Result<()>,
    ) -> Result<()> {
        let txn = self.env.read_txn()?;
        let chunk_size = chunk_size.max(1);
        let mut chunk = Vec::with_capacity(chunk_size.min(1024));
        for item in self.records.iter(&txn)? {
            let (_, data) = item?;
            chunk.push(FeatureRecord::decode(data)?);
            if chunk.len() == chunk_size {
                f(&chunk)?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            f(&chunk)?;
        }
        Ok(())
    }
}
