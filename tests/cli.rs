use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

fn artwork(size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        let (fx, fy) = (x as f32 / size as f32, y as f32 / size as f32);
        let v = 128. + 50. * (fx * 9.).sin() + 40. * (fy * 7.).cos() + 30. * (fx * fy * 20.).sin();
        Rgb([v.clamp(0., 255.) as u8, (255. * fx) as u8, (255. * fy) as u8])
    })
}

/// 生成测试图片目录：两张内容相同的图片、一张无关图片和一个非图片文件
fn dataset() -> Result<TempDir> {
    let dir = TempDir::new()?;
    let original = DynamicImage::ImageRgb8(artwork(128));
    original.save_with_format(dir.child("a.png").path(), ImageFormat::Png)?;
    dir.child("sub").create_dir_all()?;
    original.save_with_format(dir.child("sub/b.png").path(), ImageFormat::Png)?;
    let mut other = artwork(128);
    image::imageops::invert(&mut other);
    DynamicImage::ImageRgb8(other).save_with_format(dir.child("c.jpg").path(), ImageFormat::Jpeg)?;
    dir.child("notes.txt").write_str("not an image")?;
    Ok(dir)
}

/// 以文件名（不含扩展名）作为条目 ID 提取特征
fn extract(conf_dir: &TempDir, dataset: &TempDir, arg: &str) -> Result<assert_cmd::assert::Assert> {
    Ok(cargo_run!(
        "artsearch",
        "-c",
        conf_dir.path(),
        "extract",
        dataset.path(),
        "-r",
        r"^.*/([a-z]+)\.[a-z]+$",
        "$1",
        arg
    )
    .success())
}

#[test]
fn extract_then_show() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = dataset()?;
    extract(&conf_dir, &dataset, "-j2")?;

    cargo_run!("artsearch", "-c", conf_dir.path(), "show")
        .success()
        .stdout(predicate::str::contains("a\t128x128"))
        .stdout(predicate::str::contains("b\t128x128"))
        .stdout(predicate::str::contains("c\t128x128"))
        .stdout(predicate::str::contains("notes").not());

    cargo_run!("artsearch", "-c", conf_dir.path(), "show", "a")
        .success()
        .stdout(predicate::str::contains("\"item_id\": \"a\""))
        .stdout(predicate::str::contains("\"phash\""));

    cargo_run!("artsearch", "-c", conf_dir.path(), "show", "missing").failure();
    Ok(())
}

#[rstest]
#[case::hash("hash")]
#[case::combined("combined")]
fn search_by_item(#[case] method: &str) -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = dataset()?;
    extract(&conf_dir, &dataset, "-j2")?;

    cargo_run!("artsearch", "-c", conf_dir.path(), "search", "a", "-m", method, "--count", "1")
        .success()
        .stdout(predicate::str::is_match(r"^1\.0000\thash\tidentical\tb\n$")?);
    Ok(())
}

#[test]
fn search_by_image_json() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = dataset()?;
    extract(&conf_dir, &dataset, "-j2")?;

    cargo_run!(
        "artsearch",
        "-c",
        conf_dir.path(),
        "search",
        "--image",
        dataset.child("a.png").path(),
        "--output-format",
        "json"
    )
    .success()
    .stdout(predicate::str::contains("\"item_id\": \"a\""))
    .stdout(predicate::str::contains("\"item_id\": \"c\""));

    cargo_run!("artsearch", "-c", conf_dir.path(), "search", "-m", "embedding", "a").failure();
    Ok(())
}

#[test]
fn duplicates_and_delete() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = dataset()?;
    extract(&conf_dir, &dataset, "-j2")?;

    cargo_run!("artsearch", "-c", conf_dir.path(), "duplicates")
        .success()
        .stdout(predicate::str::contains("0\t0\ta\n0\t0\tb\n"))
        .stdout(predicate::str::contains("\tc\n").not());

    cargo_run!("artsearch", "-c", conf_dir.path(), "delete", "b").success();
    cargo_run!("artsearch", "-c", conf_dir.path(), "duplicates").success().stdout("");
    cargo_run!("artsearch", "-c", conf_dir.path(), "show", "b").failure();
    Ok(())
}

#[test]
fn extract_skips_existing() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = dataset()?;
    extract(&conf_dir, &dataset, "-j2")?;

    extract(&conf_dir, &dataset, "--no-overwrite")?.stderr(predicate::str::contains("跳过 3"));
    Ok(())
}

#[test]
fn show_by_hash() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = dataset()?;
    extract(&conf_dir, &dataset, "-j2")?;

    let output = cargo_run!("artsearch", "-c", conf_dir.path(), "show", "a").success();
    let record: serde_json::Value = serde_json::from_slice(&output.get_output().stdout)?;
    let phash = record["phash"].as_str().unwrap_or_default().to_string();
    assert_eq!(phash.len(), 16);

    cargo_run!("artsearch", "-c", conf_dir.path(), "show", "--hash", &phash)
        .success()
        .stdout(predicate::str::starts_with(format!("a\t128x128\t{phash}")))
        .stdout(predicate::str::contains(format!("b\t128x128\t{phash}")))
        .stdout(predicate::str::is_match("(?m)^c\t")?.not());

    cargo_run!("artsearch", "-c", conf_dir.path(), "show", "--hash", "xyz").failure();
    Ok(())
}
