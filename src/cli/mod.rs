mod delete;
mod duplicates;
mod extract;
mod search;
mod show;

pub use delete::*;
pub use duplicates::*;
pub use extract::*;
pub use search::*;
pub use show::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
