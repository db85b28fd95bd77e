use std::fs;
use std::io::{self, BufReader};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use flamepipe::collapse::perf;
use flamepipe::collapse::Collapse;

// the checked-in profile is tiny, so repeat it to get something worth measuring
const REPEAT: usize = 2000;

fn collapse_benchmark<C>(c: &mut Criterion, mut collapser: C, id: &str, infile: &str)
where
    C: 'static + Collapse,
{
    let sample = fs::read(infile).expect("file not found");
    let bytes = sample.repeat(REPEAT);

    let mut group = c.benchmark_group("collapse");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_with_input(id, &bytes, move |b, data| {
        b.iter(|| {
            let reader = BufReader::new(data.as_slice());
            let _folder = collapser.collapse(reader, io::sink());
        })
    });
    group.finish();
}

fn perf(c: &mut Criterion) {
    let infile = "tests/data/collapse-perf/day9.txt";
    collapse_benchmark(
        c,
        perf::Folder::from(perf::Options::default()),
        "perf",
        infile,
    );
}

criterion_group!(benches, perf);
criterion_main!(benches);
