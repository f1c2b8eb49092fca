use std::fs;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use log::debug;

use crate::ArtDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, FusionOptions, HashOptions, Opts, QueryOptions};
use crate::similarity::SimilarityHit;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub hash: HashOptions,
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub fusion: FusionOptions,
    #[command(flatten)]
    pub query: QueryOptions,
    /// 特征库中已有的条目 ID
    #[arg(required_unless_present = "image", conflicts_with = "image")]
    pub item_id: Option<String>,
    /// 以一张新图片作为查询，图片不会写入特征库
    #[arg(long, value_name = "FILE")]
    pub image: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let db = ArtDBBuilder::new(opts.conf_dir.clone())
            .hash(self.hash.clone())
            .embed(self.embed.clone())
            .fusion(self.fusion.clone())
            .open()?;

        let result = match (&self.item_id, &self.image) {
            (_, Some(image)) => {
                let data = fs::read(image)?;
                db.search_image(&data, None, &self.query, None)?
            }
            (Some(item_id), None) => db.search_item(item_id, &self.query, None)?,
            (None, None) => bail!("需要指定条目 ID 或 --image"),
        };
        debug!("返回 {} 条结果", result.len());

        print_result(&result, self.output_format)
    }
}

fn print_result(result: &[SimilarityHit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                let methods = hit.methods.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(",");
                let tier = hit.tier.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
                println!("{:.4}\t{}\t{}\t{}", hit.score, methods, tier, hit.item_id);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
