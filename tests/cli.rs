use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use image::{DynamicImage, ImageFormat, RgbImage};
use predicates::prelude::*;
use rstest::*;

/// 指向一个不可达的端口，描述和嵌入服务始终不可用
const OFFLINE: [&str; 4] = ["--ollama-url", "http://127.0.0.1:9", "--timeout", "2"];

macro_rules! cargo_run {
    ($conf:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin("imcatalog")?;
            cmd.arg("-c").arg($conf).args(OFFLINE);
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

fn write_png(path: &Path, width: u32, height: u32) -> PathBuf {
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
    path.to_path_buf()
}

struct Dataset {
    conf: TempDir,
    images: TempDir,
}

#[fixture]
fn dataset() -> Dataset {
    let conf = TempDir::new().unwrap();
    let images = TempDir::new().unwrap();
    write_png(&images.path().join("red.png"), 8, 4);
    write_png(&images.path().join("blue.png"), 16, 16);
    std::fs::write(images.path().join("readme.txt"), "not an image").unwrap();
    std::fs::create_dir(images.path().join("nested")).unwrap();
    write_png(&images.path().join("nested").join("green.png"), 4, 4);
    Dataset { conf, images }
}

#[rstest]
fn add_is_idempotent(dataset: Dataset) -> Result<()> {
    let conf = dataset.conf.path();

    cargo_run!(conf, "add", dataset.images.path())
        .success()
        .stdout(predicate::str::contains("indexed: 2\tskipped: 0\tfailed: 0"));
    cargo_run!(conf, "add", "-r", dataset.images.path())
        .success()
        .stdout(predicate::str::contains("indexed: 1\tskipped: 2\tfailed: 0"));

    assert!(conf.join("catalog.db").exists());
    Ok(())
}

#[rstest]
fn list_records(dataset: Dataset) -> Result<()> {
    let conf = dataset.conf.path();
    cargo_run!(conf, "add", "--recursive", dataset.images.path()).success();

    cargo_run!(conf, "list")
        .success()
        .stdout(predicate::str::contains("red.png"))
        .stdout(predicate::str::contains("green.png"))
        .stdout(predicate::str::contains("/ 3"));

    let output = cargo_run!(conf, "list", "--output-format", "json", "--limit", "2")
        .success()
        .get_output()
        .stdout
        .clone();
    let records: serde_json::Value = serde_json::from_slice(&output)?;
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 2);
    for record in records {
        assert_eq!(record["exists"], true);
        assert_eq!(record["description"], "");
        assert_eq!(record["metadata"]["Format"], "image/png");
    }

    Ok(())
}

#[rstest]
fn search_without_vectors(dataset: Dataset) -> Result<()> {
    let conf = dataset.conf.path();
    cargo_run!(conf, "add", dataset.images.path()).success();

    cargo_run!(conf, "search", "a red square")
        .failure()
        .stderr(predicate::str::contains("向量索引为空"));
    cargo_run!(conf, "search", "--lexical", "red").success().stdout(predicate::str::is_empty());
    cargo_run!(conf, "search", "--lexical", "?!").failure();

    Ok(())
}

#[rstest]
fn prune_and_sync(dataset: Dataset) -> Result<()> {
    let conf = dataset.conf.path();
    cargo_run!(conf, "add", dataset.images.path()).success();

    std::fs::remove_file(dataset.images.path().join("red.png"))?;
    cargo_run!(conf, "list").success().stdout(predicate::str::contains("[missing]"));

    cargo_run!(conf, "prune").success().stdout(predicate::str::contains("red.png"));
    cargo_run!(conf, "list").success().stdout(predicate::str::contains("red.png").not());

    cargo_run!(conf, "sync")
        .success()
        .stdout(predicate::str::contains("\"vectors_pending\": 0"));
    Ok(())
}

#[rstest]
fn build_with_empty_catalog(dataset: Dataset) -> Result<()> {
    cargo_run!(dataset.conf.path(), "build").success();
    assert!(dataset.conf.path().join("vectors.bin").exists());
    Ok(())
}
