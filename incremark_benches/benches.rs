//! Marking benchmarks
//!
//! Measures:
//! - Full unlimited marking of a random heap
//! - Sliced marking with varying slice budgets
//! - Marking with a capped mark stack (delayed marking)
//! - Weak marking of long weak map chains, linear and fallback

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use incremark::{
    CellId, CellKind, IncrementalProgress, Marker, MarkerOptions, MarkerOptionsBuilder, MarkingHeap,
    SimpleHeap, SlotsKind, UnlimitedBudget, WorkBudget,
};

const HEAP_CELLS: usize = 20_000;

fn random_heap(seed: u64) -> SimpleHeap {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut heap = SimpleHeap::new();

    let cells: Vec<CellId> = (0..HEAP_CELLS)
        .map(|_| heap.alloc(CellKind::ALL[rng.random_range(0..CellKind::ALL.len())]))
        .collect();

    for &cell in &cells {
        let kind = heap.kind(cell);
        if kind == CellKind::BigInt {
            continue;
        }

        for _ in 0..rng.random_range(0..4) {
            heap.add_edge(cell, cells[rng.random_range(0..cells.len())], "field");
        }
        if kind.has_slots() && rng.random_bool(0.05) {
            for _ in 0..rng.random_range(0..512) {
                heap.push_slot(cell, SlotsKind::Elements, cells[rng.random_range(0..cells.len())]);
            }
        }
    }

    for _ in 0..32 {
        heap.add_root(cells[rng.random_range(0..cells.len())]);
    }

    heap
}

/// `length` weak maps where each map's value is the next map's key.
fn weak_chain_heap(length: usize) -> SimpleHeap {
    let mut heap = SimpleHeap::new();

    let mut key = heap.alloc(CellKind::Object);
    heap.add_root(key);
    for _ in 0..length {
        let map = heap.alloc(CellKind::WeakMap);
        let value = heap.alloc(CellKind::Object);
        heap.add_weak_entry(map, key, value);
        heap.add_root(map);
        key = value;
    }

    heap
}

/// Run one full cycle and return the number of slices it took.
fn mark_heap(heap: &mut SimpleHeap, options: &MarkerOptions, slice_budget: Option<usize>) -> usize {
    heap.clear_marks();

    let mut marker = Marker::new(options.clone()).unwrap();
    marker.start();
    marker.mark_roots(heap);

    let mut slices = 1;
    match slice_budget {
        None => {
            marker.mark_until_budget_exhausted(heap, &mut UnlimitedBudget);
        }
        Some(work) => {
            while marker.mark_until_budget_exhausted(heap, &mut WorkBudget::new(work))
                == IncrementalProgress::NotFinished
            {
                slices += 1;
            }
        }
    }

    marker.mark_weak_references(heap);
    marker.stop();
    slices
}

/// Benchmark: Mark a random heap in one unlimited slice
fn bench_full_mark(c: &mut Criterion) {
    let mut heap = random_heap(1);
    let options = MarkerOptions::default();

    c.bench_function("full_mark", |b| {
        b.iter(|| black_box(mark_heap(&mut heap, &options, None)));
    });
}

/// Benchmark: Sliced marking with varying budgets
fn bench_sliced_mark(c: &mut Criterion) {
    let mut heap = random_heap(2);
    let options = MarkerOptions::default();

    let mut group = c.benchmark_group("sliced_mark");
    for slice_budget in [100, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("slice_budget", slice_budget),
            &slice_budget,
            |b, &work| {
                b.iter(|| black_box(mark_heap(&mut heap, &options, Some(work))));
            },
        );
    }
    group.finish();
}

/// Benchmark: Marking with a capped mark stack
fn bench_delayed_mark(c: &mut Criterion) {
    let mut heap = random_heap(3);

    let mut group = c.benchmark_group("delayed_mark");
    for max_stack_capacity in [1, 16, 256] {
        let options = MarkerOptionsBuilder::new()
            .max_stack_capacity(Some(max_stack_capacity))
            .build();
        group.bench_with_input(
            BenchmarkId::new("max_stack_capacity", max_stack_capacity),
            &options,
            |b, options| {
                b.iter(|| black_box(mark_heap(&mut heap, options, None)));
            },
        );
    }
    group.finish();
}

/// Benchmark: Weak map chains, linear weak marking against the fallback
fn bench_weak_marking(c: &mut Criterion) {
    let mut heap = weak_chain_heap(200);

    let linear = MarkerOptions::default();
    let fallback = MarkerOptionsBuilder::new().max_ephemeron_edges(Some(0)).build();

    let mut group = c.benchmark_group("weak_marking");
    group.bench_function("linear", |b| {
        b.iter(|| black_box(mark_heap(&mut heap, &linear, None)));
    });
    group.bench_function("fallback", |b| {
        b.iter(|| black_box(mark_heap(&mut heap, &fallback, None)));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_full_mark,
    bench_sliced_mark,
    bench_delayed_mark,
    bench_weak_marking
);

criterion_main!(benches);
