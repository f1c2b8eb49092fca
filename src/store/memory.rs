use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::FeatureStore;
use crate::error::{Error, Result};
use crate::hamming::BitHash;
use crate::record::{FeatureRecord, HashKind};

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, FeatureRecord>,
    /// 哈希值到条目 ID 的索引
    index: HashMap<(HashKind, BitHash), BTreeSet<String>>,
}

impl Inner {
    fn unindex(&mut self, record: &FeatureRecord) {
        for kind in HashKind::ALL {
            if let Some(hash) = record.hash(kind) {
                let key = (kind, hash.clone());
                if let Some(ids) = self.index.get_mut(&key) {
                    ids.remove(&record.item_id);
                    if ids.is_empty() {
                        self.index.remove(&key);
                    }
                }
            }
        }
    }

    fn index(&mut self, record: &FeatureRecord) {
        for kind in HashKind::ALL {
            if let Some(hash) = record.hash(kind) {
                self.index.entry((kind, hash.clone())).or_default().insert(record.item_id.clone());
            }
        }
    }
}

/// 内存中的特征库，用于测试和一次性查询
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| Error::Store("锁已损坏".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| Error::Store("锁已损坏".into()))
    }
}

impl FeatureStore for MemoryStore {
    fn save(&self, record: &FeatureRecord) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(old) = inner.records.remove(&record.item_id) {
            inner.unindex(&old);
        }
        inner.index(record);
        inner.records.insert(record.item_id.clone(), record.clone());
        Ok(())
    }

    fn find(&self, item_id: &str) -> Result<Option<FeatureRecord>> {
        Ok(self.read()?.records.get(item_id).cloned())
    }

    fn find_page(&self, offset: usize, limit: usize) -> Result<Vec<FeatureRecord>> {
        Ok(self.read()?.records.values().skip(offset).take(limit).cloned().collect())
    }

    fn find_by_hash(&self, hash: &BitHash, kind: HashKind) -> Result<Vec<FeatureRecord>> {
        let inner = self.read()?;
        let Some(ids) = inner.index.get(&(kind, hash.clone())) else {
            return Ok(vec![]);
        };
        Ok(ids.iter().filter_map(|id| inner.records.get(id).cloned()).collect())
    }

    fn delete(&self, item_id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.records.remove(item_id) {
            Some(old) => {
                inner.unindex(&old);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }

    fn scan(
        &self,
        chunk_size: usize,
        f: &mut dyn FnMut(&[FeatureRecord]) -> Result<()>,
    ) -> Result<()> {
        let inner = self.read()?;
        let chunk_size = chunk_size.max(1);
        let mut chunk = Vec::with_capacity(chunk_size.min(inner.records.len()));
        for record in inner.records.values() {
            chunk.push(record.clone());
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
