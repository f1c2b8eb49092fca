use anyhow::Result;
use clap::Parser;

use crate::ArtDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::error::Error;
use crate::hamming::BitHash;
use crate::record::{FeatureRecord, HashKind};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 条目 ID，不指定时按 ID 顺序列出特征库中的条目
    #[arg(conflicts_with = "hash")]
    pub item_id: Option<String>,
    /// 列出哈希与之完全相同的条目，十六进制格式
    #[arg(long, value_name = "HEX")]
    pub hash: Option<BitHash>,
    /// `--hash` 的哈希类型
    #[arg(long, value_enum, default_value_t = HashKind::Phash)]
    pub kind: HashKind,
    /// 列出条目时跳过的数量
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    /// 列出条目时的最大数量
    #[arg(long, default_value_t = 100)]
    pub limit: usize,
}

impl SubCommandExtend for ShowCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let db = ArtDBBuilder::new(opts.conf_dir.clone()).open()?;

        if let Some(item_id) = &self.item_id {
            let record = db.find(item_id)?.ok_or_else(|| Error::NotFound(item_id.clone()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            return Ok(());
        }

        let records = match &self.hash {
            Some(hash) => db.find_by_hash(hash, self.kind)?,
            None => db.find_page(self.offset, self.limit)?,
        };
        records.iter().for_each(print_summary);
        Ok(())
    }
}

fn print_summary(record: &FeatureRecord) {
    let phash = record.phash.as_ref().map(BitHash::to_hex).unwrap_or_default();
    println!(
        "{}\t{}x{}\t{}\t{}",
        record.item_id, record.width_px, record.height_px, phash, record.model_version
    );
}
