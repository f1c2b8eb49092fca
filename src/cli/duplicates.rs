use anyhow::Result;
use clap::Parser;

use crate::ArtDBBuilder;
use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::{DEFAULT_TIER_IDENTICAL, Opts};

#[derive(Parser, Debug, Clone)]
pub struct DuplicatesCommand {
    /// pHash 汉明距离不超过该值的图片视为重复
    #[arg(short, long, value_name = "BITS", default_value_t = DEFAULT_TIER_IDENTICAL)]
    pub distance: u32,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for DuplicatesCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let db = ArtDBBuilder::new(opts.conf_dir.clone()).open()?;
        let groups = db.duplicates(self.distance)?;

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&groups)?),
            OutputFormat::Table => {
                for (i, group) in groups.iter().enumerate() {
                    for (item_id, distance) in &group.members {
                        println!("{i}\t{distance}\t{item_id}");
                    }
                }
            }
        }
        Ok(())
    }
}
