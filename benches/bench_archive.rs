/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */
use criterion::{criterion_group, criterion_main, Criterion};
use heap_archive::{
    cds::entry_fields::EntryFieldConfig,
    prelude::*,
    runtime::library::{define_base_library, INTEGER_CACHE},
};
criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

fn initialize_caches(rt: &mut Runtime) {
    define_base_library(rt);
    let cache = rt.resolve_class(INTEGER_CACHE).unwrap();
    rt.initialize_class(cache).unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut initial_rt = Runtime::new(Options::default());
    define_base_library(&mut initial_rt);
    let archive = HeapArchive::dump(&mut initial_rt, &EntryFieldConfig::default()).unwrap();

    c.bench_function("dump default subgraphs", |b| {
        b.iter_with_large_drop(|| {
            let mut rt = Runtime::new(Options::default());
            define_base_library(&mut rt);
            HeapArchive::dump(&mut rt, &EntryFieldConfig::default()).unwrap()
        });
    });

    c.bench_function("integer cache from scratch", |b| {
        b.iter_with_large_drop(|| {
            let mut rt = Runtime::new(Options::default());
            initialize_caches(&mut rt);
            rt
        });
    });

    c.bench_function("integer cache from archive", |b| {
        b.iter_with_large_drop(|| {
            let mut rt = Runtime::with_archive(Options::default(), &archive).unwrap();
            initialize_caches(&mut rt);
            rt
        });
    });
}
