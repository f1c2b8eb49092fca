use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};
use regex::Regex;

use crate::ArtDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{AnalyzeOptions, EmbedOptions, ExtractOptions, HashOptions, Opts};
use crate::extract::ExtractItem;
use crate::metrics;
use crate::utils::{ItemIdRewriter, pb_style, scan_directory, suffix_regex};

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    #[command(flatten)]
    pub hash: HashOptions,
    #[command(flatten)]
    pub analyze: AnalyzeOptions,
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub extract: ExtractOptions,
    /// 图片文件或所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png,webp")]
    pub suffix: String,
    /// 用正则表达式改写文件路径作为条目 ID
    /// 例：`-r '^.*/(?<name>[0-9]+)\.jpg$' 'art-$name'`
    #[arg(short, long, num_args = 2, value_names = ["REGEX", "REPLACE"], verbatim_doc_comment)]
    pub replace: Vec<String>,
    /// Prometheus Pushgateway 地址，提取结束后推送指标
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 推送指标时使用的 instance 标签
    #[arg(long, value_name = "NAME", default_value = "artsearch")]
    pub prometheus_instance: String,
    /// Pushgateway 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl ExtractCommand {
    fn rewriter(&self) -> Result<ItemIdRewriter> {
        match self.replace.as_slice() {
            [] => Ok(ItemIdRewriter::default()),
            [re, rep] => Ok(ItemIdRewriter::new(Some((Regex::new(re)?, rep.clone())))),
            _ => bail!("--replace 需要两个参数"),
        }
    }
}

impl SubCommandExtend for ExtractCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let rewriter = self.rewriter()?;
        let paths = if self.path.is_file() {
            vec![self.path.clone()]
        } else {
            scan_directory(&self.path, &suffix_regex(&self.suffix)?)
        };
        let items = paths
            .into_iter()
            .map(|path| ExtractItem::from_path(rewriter.item_id(&path), path))
            .collect::<Vec<_>>();

        let db = ArtDBBuilder::new(opts.conf_dir.clone())
            .hash(self.hash.clone())
            .analyze(self.analyze.clone())
            .embed(self.embed.clone())
            .extract(self.extract.clone())
            .open()?;

        let pb = ProgressBar::new(items.len() as u64).with_style(pb_style());
        let report = db.add_images(&items, self.extract.concurrency, Some(&pb));
        pb.finish_with_message("完成");

        for (item_id, e) in &report.failed {
            warn!("{item_id}: {e}");
        }
        info!(
            "共 {} 张图片：成功 {}，跳过 {}，失败 {}",
            report.total(),
            report.succeeded,
            report.skipped,
            report.failed.len()
        );

        if let Some(url) = &self.prometheus_push {
            metrics::push_metrics(url, &self.prometheus_instance, self.prometheus_auth.as_deref());
        }

        Ok(())
    }
}
