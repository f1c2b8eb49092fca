use std::io::Cursor;
use std::sync::Arc;

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rstest::*;

use artsearch::config::{ConfDir, EmbedOptions, HashOptions, QueryOptions};
use artsearch::embed::{Embedder, finalize_embedding};
use artsearch::extract::ExtractItem;
use artsearch::normalize::NormalizedImage;
use artsearch::similarity::{CancelToken, Method};
use artsearch::{ArtDB, ArtDBBuilder, Error};

/// 平滑变化的合成画作，亮度带有 x、y 交叉项
fn artwork(size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        let (fx, fy) = (x as f32 / size as f32, y as f32 / size as f32);
        let v = 128. + 50. * (fx * 9.).sin() + 40. * (fy * 7.).cos() + 30. * (fx * fy * 20.).sin();
        Rgb([v.clamp(0., 255.) as u8, (255. * fx) as u8, (255. * fy) as u8])
    })
}

fn invert(image: &RgbImage) -> RgbImage {
    let mut image = image.clone();
    imageops::invert(&mut image);
    image
}

fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(vec![]);
    DynamicImage::ImageRgb8(image.clone()).write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// 原图、缩小一半后的 JPEG、颜色反转的无关图片
fn catalog() -> Vec<ExtractItem> {
    let original = artwork(256);
    let resized = imageops::resize(&original, 128, 128, FilterType::Triangle);
    vec![
        ExtractItem::from_bytes("original", encode(&original, ImageFormat::Png), Some("image/png")),
        ExtractItem::from_bytes("resized", encode(&resized, ImageFormat::Jpeg), Some("image/jpeg")),
        ExtractItem::from_bytes("unrelated", encode(&invert(&original), ImageFormat::Png), None),
    ]
}

/// 以平均颜色为向量的编码器
struct MeanColor;

impl Embedder for MeanColor {
    fn model_version(&self) -> &str {
        "mean-color"
    }

    fn dimension(&self) -> usize {
        3
    }

    fn embed(&self, image: &NormalizedImage) -> artsearch::Result<Vec<f32>> {
        let n = (image.width() * image.height()) as f32;
        let mut v = vec![0f32; 3];
        for p in image.pixels.pixels() {
            for c in 0..3 {
                v[c] += p[c] as f32 / n;
            }
        }
        finalize_embedding(v, 3)
    }
}

fn memory_db(embedder: bool) -> Result<ArtDB> {
    let builder = ArtDBBuilder::new(ConfDir::new("/nonexistent")).in_memory(true);
    let builder = match embedder {
        true => builder
            .embed(EmbedOptions { embedding_dim: 3, ..Default::default() })
            .embedder(Arc::new(MeanColor)),
        false => builder,
    };
    Ok(builder.open()?)
}

fn query(method: Method) -> QueryOptions {
    QueryOptions { method, ..Default::default() }
}

#[test]
fn resized_copy_ranks_above_unrelated() -> Result<()> {
    let db = memory_db(false)?;
    let report = db.add_images(&catalog(), 2, None);
    assert_eq!(report.succeeded, 3);

    let hits = db.search_item("original", &query(Method::Hash), None)?;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].item_id, "resized");
    assert_eq!(hits[1].item_id, "unrelated");
    assert!(hits[0].score >= 1. - 15. / 64.);
    assert!(hits[0].score > hits[1].score);
    assert!(hits[0].phash_distance.is_some_and(|d| d <= 15));
    Ok(())
}

#[test]
fn query_excludes_self_and_is_deterministic() -> Result<()> {
    let db = memory_db(false)?;
    db.add_images(&catalog(), 1, None);

    let first = db.search_item("resized", &query(Method::Combined), None)?;
    let second = db.search_item("resized", &query(Method::Combined), None)?;
    assert_eq!(first, second);
    assert!(first.iter().all(|hit| hit.item_id != "resized"));
    Ok(())
}

#[test]
fn batch_with_corrupt_image() -> Result<()> {
    let db = memory_db(false)?;
    let mut items = catalog();
    items.insert(1, ExtractItem::from_bytes("corrupt", b"GIF89a\x00\x00".to_vec(), None));

    let report = db.add_images(&items, 4, None);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "corrupt");
    assert_eq!(db.len()?, 3);
    assert!(db.find("corrupt")?.is_none());
    Ok(())
}

#[rstest]
#[case::hash(Method::Hash, &[Method::Hash])]
#[case::embedding(Method::Embedding, &[Method::Embedding])]
#[case::combined(Method::Combined, &[Method::Hash, Method::Embedding])]
fn methods_are_attributed(#[case] method: Method, #[case] expected: &[Method]) -> Result<()> {
    let db = memory_db(true)?;
    db.add_images(&catalog(), 2, None);

    let hits = db.search_item("original", &query(method), None)?;
    assert_eq!(hits.len(), 2);
    for hit in &hits {
        assert_eq!(hit.methods.as_slice(), expected);
        assert_eq!(hit.hash_score.is_some(), expected.contains(&Method::Hash));
        assert_eq!(hit.embedding_score.is_some(), expected.contains(&Method::Embedding));
        assert!((0. ..=1.).contains(&hit.score));
    }
    Ok(())
}

#[test]
fn embedding_query_without_embedder() -> Result<()> {
    let db = memory_db(false)?;
    db.add_images(&catalog(), 2, None);

    let err = db.search_item("original", &query(Method::Embedding), None).unwrap_err();
    assert!(matches!(err, Error::NoSignal(Method::Embedding)));
    Ok(())
}

#[test]
fn empty_catalog() -> Result<()> {
    let db = memory_db(false)?;
    let data = encode(&artwork(64), ImageFormat::Png);
    assert!(db.search_image(&data, None, &query(Method::Combined), None)?.is_empty());
    assert!(db.duplicates(5)?.is_empty());

    let err = db.search_item("missing", &query(Method::Hash), None).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    Ok(())
}

#[test]
fn search_by_new_image() -> Result<()> {
    let db = memory_db(false)?;
    db.add_images(&catalog(), 2, None);

    let data = encode(&artwork(200), ImageFormat::Jpeg);
    let hits = db.search_image(&data, None, &query(Method::Hash), None)?;
    assert_eq!(hits.len(), 3);
    assert_ne!(hits[0].item_id, "unrelated");
    assert_eq!(hits[2].item_id, "unrelated");
    assert_eq!(db.len()?, 3);
    Ok(())
}

#[test]
fn cancelled_query() -> Result<()> {
    let db = memory_db(false)?;
    db.add_images(&catalog(), 2, None);

    let token = CancelToken::new();
    token.cancel();
    let err = db.search_item("original", &query(Method::Hash), Some(&token)).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    Ok(())
}

#[test]
fn duplicate_groups() -> Result<()> {
    let db = memory_db(false)?;
    let mut items = catalog();
    let copy = encode(&artwork(256), ImageFormat::Png);
    items.push(ExtractItem::from_bytes("copy", copy, None));
    db.add_images(&items, 2, None);

    let groups = db.duplicates(5)?;
    assert_eq!(groups.len(), 1);
    let members = groups[0].members.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>();
    assert_eq!(members[..2], ["copy", "original"]);
    assert!(!members.contains(&"unrelated"));
    assert_eq!(groups[0].members[1].1, 0);
    Ok(())
}

#[test]
fn invalid_hash_size_is_rejected() {
    let builder = ArtDBBuilder::new(ConfDir::new("/nonexistent"))
        .in_memory(true)
        .hash(HashOptions { hash_size: 6, ..Default::default() });
    assert!(matches!(builder.open(), Err(Error::InvalidConfig(_))));
}

#[test]
fn lmdb_catalog_survives_reopen() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    {
        let db = ArtDBBuilder::new(ConfDir::new(conf_dir.path())).open()?;
        let report = db.add_images(&catalog(), 2, None);
        assert_eq!(report.succeeded, 3);
    }

    let db = ArtDBBuilder::new(ConfDir::new(conf_dir.path())).open()?;
    assert_eq!(db.len()?, 3);
    let record = db.find("original")?.expect("record should exist");
    assert_eq!((record.width_px, record.height_px), (256, 256));
    assert_eq!(record.format, "png");

    let hits = db.search_item("original", &query(Method::Hash), None)?;
    assert_eq!(hits[0].item_id, "resized");

    assert!(db.delete("resized")?);
    assert!(!db.delete("resized")?);
    assert_eq!(db.len()?, 2);
    Ok(())
}
