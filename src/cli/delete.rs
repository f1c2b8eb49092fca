use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use crate::ArtDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// 要删除的条目 ID
    #[arg(required = true)]
    pub item_ids: Vec<String>,
}

impl SubCommandExtend for DeleteCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let db = ArtDBBuilder::new(opts.conf_dir.clone()).open()?;
        for item_id in &self.item_ids {
            if db.delete(item_id)? {
                info!("已删除: {item_id}");
            } else {
                warn!("条目不存在: {item_id}");
            }
        }
        Ok(())
    }
}
