use comet_marker::{
    CollectionType, GcRef, Heap, HeapConfig, MarkingConfig, StackState, TraceTrait, Visitor,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

pub struct Tree {
    left: Option<GcRef<Tree>>,
    right: Option<GcRef<Tree>>,
}

impl TraceTrait for Tree {
    fn trace(&self, vis: &mut Visitor<'_>) {
        self.left.trace(vis);
        self.right.trace(vis);
    }
}

fn bottom_up_tree(heap: &mut Heap, depth: usize) -> GcRef<Tree> {
    if depth == 0 {
        return heap.allocate(Tree {
            left: None,
            right: None,
        });
    }
    let left = bottom_up_tree(heap, depth - 1);
    let right = bottom_up_tree(heap, depth - 1);
    heap.allocate(Tree {
        left: Some(left),
        right: Some(right),
    })
}

pub fn bench_marking(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary trees");
    group.sample_size(50);

    for depth in 12..17 {
        group.bench_function(BenchmarkId::new("atomic", depth), |b| {
            b.iter_batched_ref(
                || {
                    let mut heap = Heap::new(HeapConfig::default());
                    let tree = bottom_up_tree(&mut heap, depth);
                    let root = heap.persistent(tree);
                    (heap, root)
                },
                |(heap, _root)| {
                    heap.collect_garbage().unwrap();
                },
                criterion::BatchSize::LargeInput,
            );
        });

        group.bench_function(BenchmarkId::new("incremental", depth), |b| {
            b.iter_batched_ref(
                || {
                    let mut heap = Heap::new(HeapConfig::default());
                    let tree = bottom_up_tree(&mut heap, depth);
                    let root = heap.persistent(tree);
                    (heap, root)
                },
                |(heap, _root)| {
                    heap.start_incremental_garbage_collection(CollectionType::Major);
                    heap.run_pending_tasks();
                    heap
                        .finalize_garbage_collection(StackState::NoHeapPointers)
                        .unwrap();
                },
                criterion::BatchSize::LargeInput,
            );
        });

        group.bench_function(BenchmarkId::new("generational(minor)", depth), |b| {
            b.iter_batched_ref(
                || {
                    let mut heap = Heap::new(HeapConfig {
                        generational: true,
                        ..HeapConfig::default()
                    });
                    let tree = bottom_up_tree(&mut heap, depth);
                    let root = heap.persistent(tree);
                    heap.collect_garbage().unwrap();
                    bottom_up_tree(&mut heap, depth);
                    (heap, root)
                },
                |(heap, _root)| {
                    heap.collect_garbage_with(
                        MarkingConfig::atomic().with_collection_type(CollectionType::Minor),
                    )
                    .unwrap();
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_marking);
criterion_main!(benches);
