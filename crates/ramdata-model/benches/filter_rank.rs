// SPDX-License-Identifier: Apache-2.0

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ramdata_model::{CoordinateTranslator, Filter, Mapping};

fn bench_filter(c: &mut Criterion) {
    let bits: Vec<bool> = (0..1_000_000).map(|i| i % 3 != 0).collect();
    let filter = Filter::from_bools(&bits);
    c.bench_function("filter_indices_1m", |b| {
        b.iter(|| black_box(filter.indices().len()))
    });
    c.bench_function("filter_count_1m", |b| b.iter(|| black_box(filter.count())));
}

fn bench_mapping(c: &mut Criterion) {
    let mapping = Mapping::stacked(&[250_000; 8]);
    c.bench_function("stacked_to_component", |b| {
        b.iter(|| {
            let mut acc = 0u64;
            for i in (0..2_000_000).step_by(997) {
                acc += mapping.to_component(black_box(i))[0].1;
            }
            acc
        })
    });
}

criterion_group!(benches, bench_filter, bench_mapping);
criterion_main!(benches);
