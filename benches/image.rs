use std::hint::black_box;
use std::io::Cursor;

use artsearch::analyze::ImageAnalyzer;
use artsearch::normalize::ImageNormalizer;
use artsearch::phash::PerceptualHasher;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

fn test_image(format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(1024, 768, |x, y| {
        Rgb([(x / 4) as u8, (y / 3) as u8, ((x + y) / 7) as u8])
    });
    let mut buf = Cursor::new(vec![]);
    DynamicImage::ImageRgb8(img).write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

fn benchmark_image(c: &mut Criterion) {
    let normalizer = ImageNormalizer::default();
    let jpg = test_image(ImageFormat::Jpeg);
    let png = test_image(ImageFormat::Png);
    let image = normalizer.normalize(&jpg, None).unwrap();
    let analyzer = ImageAnalyzer::default();

    let mut group = c.benchmark_group("图像处理");
    group.throughput(Throughput::Elements(1));
    group.bench_function("JPEG 解码", |b| b.iter(|| normalizer.normalize(black_box(&jpg), None)));
    group.bench_function("PNG 解码", |b| b.iter(|| normalizer.normalize(black_box(&png), None)));
    group.bench_function("图像指标", |b| b.iter(|| analyzer.analyze(black_box(&image))));
    group.finish();
}

fn benchmark_hash(c: &mut Criterion) {
    let image = ImageNormalizer::default().normalize(&test_image(ImageFormat::Jpeg), None).unwrap();
    let hasher = PerceptualHasher::new(8);

    let mut group = c.benchmark_group("哈希计算");
    group.throughput(Throughput::Elements(1));
    group.bench_function("aHash", |b| b.iter(|| hasher.average_hash(black_box(&image.pixels))));
    group.bench_function("dHash", |b| b.iter(|| hasher.difference_hash(black_box(&image.pixels))));
    group.bench_function("pHash", |b| b.iter(|| hasher.perceptual_hash(black_box(&image.pixels))));
    group.finish();
}

criterion_group!(benches, benchmark_image, benchmark_hash);
criterion_main!(benches);
