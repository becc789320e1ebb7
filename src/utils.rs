use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use log::{debug, info};
use regex::Regex;
use walkdir::WalkDir;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec:>10} {wide_msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("##-")
}

/// 根据逗号分隔的后缀名列表构建匹配扩展名的正则，忽略大小写
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    let alternatives = suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| regex::escape(s.trim_start_matches('.')))
        .collect::<Vec<_>>();
    Regex::new(&format!("(?i)^({})$", alternatives.join("|")))
}

/// 扫描目录下扩展名匹配的图片文件，结果按路径排序
///
/// `path` 为文件时直接返回它本身。`recursive` 为 false 时只扫描第一层。
pub fn scan_images(path: &Path, recursive: bool, re_suf: &Regex) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    info!("开始扫描目录: {}", path.display());
    let pb = ProgressBar::no_length().with_style(pb_style());
    let max_depth = if recursive { usize::MAX } else { 1 };
    let entries = WalkDir::new(path)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .progress_with(pb.clone())
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("跳过无法访问的路径: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()))
        })
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();
    pb.finish_and_clear();
    info!("扫描完成，共 {} 张图片", entries.len());
    entries
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_suffix_regex() {
        let re = suffix_regex("jpg, .PNG,webp").unwrap();
        assert!(re.is_match("jpg"));
        assert!(re.is_match("JPG"));
        assert!(re.is_match("png"));
        assert!(!re.is_match("jpgx"));
        assert!(!re.is_match("txt"));
    }

    #[test]
    fn test_scan_images() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(dir.path().join("b.png"), b"").unwrap();
        fs::write(dir.path().join("a.JPG"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::write(nested.join("c.png"), b"").unwrap();

        let re = suffix_regex("jpg,png").unwrap();
        let names = |paths: Vec<PathBuf>| {
            paths
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
        };

        assert_eq!(names(scan_images(dir.path(), false, &re)), vec!["a.JPG", "b.png"]);
        assert_eq!(names(scan_images(dir.path(), true, &re)), vec!["a.JPG", "b.png", "c.png"]);
        let single = dir.path().join("notes.txt");
        assert_eq!(scan_images(&single, false, &re), vec![single]);
    }
}
