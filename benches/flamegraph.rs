use std::fs;
use std::io;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use flamepipe::flamegraph::{self, Options};

fn flamegraph_benchmark(c: &mut Criterion, id: &str, infile: &str) {
    let bytes = fs::read(infile).expect("file not found");
    let opt = Options::default();

    let mut group = c.benchmark_group("flamegraph");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_with_input(id, &bytes, |b, data| {
        b.iter(|| {
            let _svg = flamegraph::from_reader(&opt, data.as_slice(), io::sink());
        })
    });
    group.finish();
}

macro_rules! flamegraph_benchmarks {
    ($($name:ident : $infile:expr),*) => {
        $(
            fn $name(c: &mut Criterion) {
                let id = stringify!($name);
                flamegraph_benchmark(c, id, $infile);
            }
        )*

        criterion_group!(benches, $($name),*);
        criterion_main!(benches);
    }
}

flamegraph_benchmarks! {
    perf: "tests/data/collapse-perf/results/day9-collapsed.txt",
    scenario: "tests/data/flamegraph/scenario.folded"
}
