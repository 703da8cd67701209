use clap::Parser;

use rand::{rngs::StdRng, Rng, SeedableRng};

use incremark::{
    verify::check_tricolor, CellId, CellKind, IncrementalProgress, Marker, MarkerOptionsBuilder,
    MarkingHeap, SimpleHeap, SlotsKind, WorkBudget, ZoneId, DEFAULT_EAGER_SCAN_LIMIT,
    DEFAULT_RANGE_CHUNK_SIZE,
};

/// Raw command line arguments.
#[derive(Parser)]
#[command(about = "Build a random heap and mark it in budgeted slices")]
pub struct Args {
    /// Number of cells to allocate
    #[arg(long, default_value_t = 100_000)]
    pub cells: usize,

    /// Maximum number of strong edges per cell
    #[arg(long, default_value_t = 4)]
    pub fanout: usize,

    /// Number of weak maps to create, each with a handful of entries
    #[arg(long, default_value_t = 64)]
    pub weak_maps: usize,

    /// Work units per marking slice
    #[arg(long, default_value_t = 10_000)]
    pub slice_budget: usize,

    /// Hard cap on the mark stack. Overflow falls back to delayed marking.
    #[arg(long)]
    pub max_stack_capacity: Option<usize>,

    /// Slots traced per range entry
    #[arg(long, default_value_t = DEFAULT_RANGE_CHUNK_SIZE)]
    pub range_chunk_size: usize,

    /// Cells followed by one eager scan
    #[arg(long, default_value_t = DEFAULT_EAGER_SCAN_LIMIT)]
    pub eager_scan_limit: usize,

    /// Build the ephemeron table only when weak marking starts
    #[arg(long, default_value_t = false)]
    pub no_incremental_weak_maps: bool,

    /// Seed for the heap generator
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

/// Create marker options from command line arguments.
fn options_from_args(args: &Args) -> MarkerOptionsBuilder {
    MarkerOptionsBuilder::new()
        .max_stack_capacity(args.max_stack_capacity)
        .range_chunk_size(args.range_chunk_size)
        .eager_scan_limit(args.eager_scan_limit)
        .incremental_weak_map_marking(!args.no_incremental_weak_maps)
}

pub fn print_error_message_and_exit(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn build_heap(args: &Args) -> SimpleHeap {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut heap = SimpleHeap::new();

    let cells: Vec<CellId> = (0..args.cells.max(1))
        .map(|_| {
            let kind = CellKind::ALL[rng.random_range(0..CellKind::ALL.len())];
            let zone = ZoneId::new(rng.random_range(0..4));
            heap.alloc_in_zone(kind, zone)
        })
        .collect();

    for &cell in &cells {
        let kind = heap.kind(cell);
        if kind == CellKind::BigInt {
            continue;
        }

        for _ in 0..rng.random_range(0..=args.fanout) {
            let target = cells[rng.random_range(0..cells.len())];
            heap.add_edge(cell, target, "field");
        }

        if kind.has_slots() && rng.random_bool(0.05) {
            for _ in 0..rng.random_range(0..1024) {
                let target = cells[rng.random_range(0..cells.len())];
                heap.push_slot(cell, SlotsKind::Elements, target);
            }
        }
    }

    for _ in 0..args.weak_maps {
        let map = heap.alloc(CellKind::WeakMap);
        heap.add_root(map);
        for _ in 0..rng.random_range(1..8) {
            let key = cells[rng.random_range(0..cells.len())];
            let value = cells[rng.random_range(0..cells.len())];
            heap.add_weak_entry(map, key, value);
        }
    }

    for _ in 0..16 {
        heap.add_root(cells[rng.random_range(0..cells.len())]);
    }
    heap.add_gray_root(cells[rng.random_range(0..cells.len())]);

    heap
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let options = options_from_args(&args).build();

    let mut heap = build_heap(&args);
    log::info!("built heap with {} cells", heap.len());

    let mut marker = match Marker::new(options) {
        Ok(marker) => marker,
        Err(err) => print_error_message_and_exit(&err.to_string()),
    };

    marker.start();
    marker.mark_roots(&mut heap);

    let mut slices = 0;
    loop {
        slices += 1;
        let mut budget = WorkBudget::new(args.slice_budget.max(1));
        if marker.mark_until_budget_exhausted(&mut heap, &mut budget) == IncrementalProgress::Finished {
            break;
        }
    }

    marker.mark_weak_references(&mut heap);
    marker.stop();

    if let Err(violation) = check_tricolor(&heap) {
        print_error_message_and_exit(&format!("marking violation: {violation}"));
    }

    let marked = heap.colors().iter().filter(|color| color.is_marked()).count();
    println!("marked {marked} of {} cells in {slices} slices", heap.len());
    println!("{:#?}", marker.stats());
}
