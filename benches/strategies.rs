//! Population strategy benchmarks.

use arrow::datatypes::Int32Type;
use arrow_memfd::frame::{
    ColumnArray, ColumnBatch, FieldSpec, FrameSchema, FrameWriter, PopulationStrategy,
    PrimitiveType,
};
use arrow_memfd::memory::SegmentAllocator;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

fn schema() -> FrameSchema {
    FrameSchema::new(vec![FieldSpec::new("rand", PrimitiveType::Int32)]).unwrap()
}

fn bench_build_column(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_column");

    for rows in [100usize, 10_000, 1_000_000] {
        let values: Vec<i32> = (0..rows as i32).map(|i| i % 100).collect();
        group.throughput(Throughput::Bytes((rows * 4) as u64));

        for strategy in [
            PopulationStrategy::AccumulateThenCopy,
            PopulationStrategy::DirectConstruct,
        ] {
            group.bench_with_input(
                BenchmarkId::new(format!("{strategy:?}"), rows),
                &values,
                |b, values| {
                    b.iter(|| {
                        ColumnArray::build::<Int32Type>(strategy, values.clone(), None).unwrap()
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_write_into_segment(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_into_segment");
    let writer = FrameWriter::new();

    for rows in [100usize, 10_000, 1_000_000] {
        let values: Vec<i32> = (0..rows as i32).map(|i| i % 100).collect();
        let batch = ColumnBatch::new(vec![
            ColumnArray::build::<Int32Type>(PopulationStrategy::DirectConstruct, values, None)
                .unwrap(),
        ]);
        let size = writer.measure(&schema(), std::slice::from_ref(&batch)).unwrap();
        let segment = SegmentAllocator::new("bench").allocate(size).unwrap();
        let mut mapping = segment.map_mut().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &batch, |b, batch| {
            b.iter(|| {
                let dst = mapping.as_mut_slice().unwrap();
                writer
                    .write_frame(dst, &schema(), std::slice::from_ref(batch))
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build_column, bench_write_into_segment);
criterion_main!(benches);
