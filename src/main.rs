use clap::Parser;
use log::error;

use artsearch::cli::SubCommandExtend;
use artsearch::config::{Opts, SubCommand};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    let result = match &opts.subcmd {
        SubCommand::Extract(cmd) => cmd.run(&opts),
        SubCommand::Search(cmd) => cmd.run(&opts),
        SubCommand::Show(cmd) => cmd.run(&opts),
        SubCommand::Duplicates(cmd) => cmd.run(&opts),
        SubCommand::Delete(cmd) => cmd.run(&opts),
    };

    if let Err(e) = result {
        error!("{e:?}");
        std::process::exit(1);
    }
}
