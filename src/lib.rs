pub mod analyze;
mod artdb;
pub mod cli;
pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod hamming;
pub mod kmeans;
mod metrics;
pub mod normalize;
pub mod phash;
pub mod record;
pub mod similarity;
pub mod store;
pub mod utils;

pub use artdb::{ArtDB, ArtDBBuilder};
pub use config::Opts;
pub use error::{Error, Result};
