//! Benchmarks for input tree discovery.
//!
//! Run with: cargo bench --package doc-batch-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use doc_batch_core::{ExportFormat, PathMirror, SUPPORTED_EXTENSIONS};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Build a tree of `dirs` folders with `files_per_dir` documents each, plus
/// some files discovery must skip.
fn build_tree(root: &Path, dirs: usize, files_per_dir: usize) {
    for d in 0..dirs {
        let dir = root.join(format!("group{:03}", d / 10)).join(format!("dir{:03}", d));
        fs::create_dir_all(&dir).unwrap();
        for f in 0..files_per_dir {
            let ext = SUPPORTED_EXTENSIONS[f % SUPPORTED_EXTENSIONS.len()];
            fs::write(dir.join(format!("doc{:04}.{}", f, ext)), b"x").unwrap();
        }
        fs::write(dir.join("image.png"), b"x").unwrap();
        fs::write(dir.join(".DS_Store"), b"x").unwrap();
    }
}

fn benchmark_discovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("discovery");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for &(dirs, files) in &[(10, 10), (50, 20), (200, 25)] {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in");
        let output = tmp.path().join("out");
        build_tree(&input, dirs, files);
        fs::create_dir_all(&output).unwrap();
        let mirror = PathMirror::new(&input, &output, ExportFormat::Markdown);

        group.bench_with_input(
            BenchmarkId::from_parameter(dirs * files),
            &mirror,
            |b, mirror| {
                b.iter(|| {
                    let tasks = mirror.discover(black_box(SUPPORTED_EXTENSIONS)).unwrap();
                    black_box(tasks.len())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_discovery);
criterion_main!(benches);
