use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use log::info;
use regex::Regex;
use walkdir::WalkDir;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec:>10} {wide_msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("##-")
}

/// 由逗号分隔的后缀名列表构造匹配扩展名的正则，不区分大小写
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?i)^({})$", suffix.replace(',', "|")))
}

/// 递归扫描目录，返回扩展名匹配的文件，按路径排序
pub fn scan_directory(path: impl AsRef<Path>, re_suf: &Regex) -> Vec<PathBuf> {
    let path = path.as_ref();
    info!("开始扫描目录: {}", path.display());
    let pb = ProgressBar::no_length().with_style(pb_style());
    let mut entries = WalkDir::new(path)
        .into_iter()
        .progress_with(pb)
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            let ext = path.extension()?;
            (path.is_file() && re_suf.is_match(&ext.to_string_lossy())).then(|| path.to_path_buf())
        })
        .collect::<Vec<_>>();
    entries.sort();
    info!("扫描完成，共 {} 张图片", entries.len());
    entries
}

/// 将文件路径转换为条目 ID，可选地用正则表达式改写
#[derive(Debug, Clone, Default)]
pub struct ItemIdRewriter {
    replace: Option<(Regex, String)>,
}

impl ItemIdRewriter {
    pub fn new(replace: Option<(Regex, String)>) -> Self {
        Self { replace }
    }

    pub fn item_id(&self, path: &Path) -> String {
        let path = path.to_string_lossy();
        match &self.replace {
            Some((re, rep)) => re.replace(&path, rep.as_str()).into_owned(),
            None => path.into_owned(),
        }
    }
}
