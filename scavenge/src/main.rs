use std::{
    process,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Instant,
};

use clap::Parser as ClapParser;
use thiserror::Error;

use scavenge::{
    BLOCK_WORDS, Cycle, GcWorker, RetiredBlocks, SanityViolation, ScavengeSettings,
    SpaceError, TODO_QUEUE_CAPACITY, WORK_UNIT_WORDS, Word, WorkerQueues,
    Workspace, WorkspaceSummary, membership_census, merge_retired,
};

/// Object header: object id, then size in words.
const HEADER_WORDS: usize = 2;
const MAX_OBJECT_WORDS: usize = 8;
const MAX_CHILDREN: u64 = 3;

const NOT_FORWARDED: usize = 0;
const BUSY: usize = 1;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 4, help = "Collector threads")]
    workers: usize,

    #[arg(long, default_value_t = 1024, help = "Blocks in the to-space")]
    blocks: usize,

    #[arg(long, default_value_t = BLOCK_WORDS, help = "Words per block")]
    block_words: usize,

    #[arg(long, default_value_t = WORK_UNIT_WORDS, help = "Scavenging work unit in words")]
    work_unit: usize,

    #[arg(long, default_value_t = TODO_QUEUE_CAPACITY, help = "Bound of each todo queue")]
    deque_capacity: usize,

    #[arg(long, default_value_t = 2, help = "Generations, one step each")]
    generations: usize,

    #[arg(long, default_value_t = 100_000, help = "Objects in the synthetic graph")]
    objects: usize,

    #[arg(long, default_value_t = 0x5eed, help = "Seed of the graph generator")]
    seed: u64,

    /// Only has an effect in debug builds
    #[arg(long, help = "Check workspace lists after every change")]
    sanity: bool,
}

#[derive(Debug, Error)]
enum DriverError {
    #[error(transparent)]
    Space(#[from] SpaceError),
    #[error(transparent)]
    Sanity(#[from] SanityViolation),
    #[error("blocks of {0} words cannot hold objects of up to {MAX_OBJECT_WORDS} words")]
    BlockTooSmall(usize),
    #[error("copied {copied} words but {reachable} words are reachable")]
    CopiedMismatch { copied: usize, reachable: usize },
    #[error("object {0} is reachable but was not evacuated correctly")]
    NotEvacuated(usize),
    #[error("only {free} of {total} blocks returned to the pool")]
    Leaked { free: usize, total: usize },
}

/// From-space object of the synthetic graph.
struct SynthObject {
    size: usize,
    children: Vec<usize>,
    /// `NOT_FORWARDED`, `BUSY` while being copied, then the to-space address.
    forward: AtomicUsize,
}

struct Graph {
    objects: Vec<SynthObject>,
    roots: Vec<usize>,
}

impl Graph {
    fn generate(count: usize, mut seed: u64) -> Self {
        let mut next = |bound: u64| -> usize {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((seed >> 32) % bound) as usize
        };

        let size_range = (MAX_OBJECT_WORDS - HEADER_WORDS + 1) as u64;
        let objects = (0..count)
            .map(|_| {
                let size = HEADER_WORDS + next(size_range);
                let edges = next(MAX_CHILDREN + 1);
                let children = (0..edges).map(|_| next(count as u64)).collect();
                SynthObject {
                    size,
                    children,
                    forward: AtomicUsize::new(NOT_FORWARDED),
                }
            })
            .collect();
        let roots = (0..count.div_ceil(8))
            .map(|_| next(count as u64))
            .collect();

        Self { objects, roots }
    }

    /// Ids of all objects reachable from the roots.
    fn reachable(&self) -> Vec<usize> {
        let mut marked = vec![false; self.objects.len()];
        let mut stack = self.roots.clone();
        let mut live = Vec::new();
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut marked[id], true) {
                continue;
            }
            live.push(id);
            stack.extend_from_slice(&self.objects[id].children);
        }
        live
    }
}

/// Copies object `id` into `ws` unless another worker got to it first.
fn evacuate(ws: &mut Workspace<'_>, graph: &Graph, id: usize) {
    let obj = &graph.objects[id];
    if obj
        .forward
        .compare_exchange(NOT_FORWARDED, BUSY, Ordering::AcqRel, Ordering::Relaxed)
        .is_err()
    {
        return;
    }
    let to = ws.reserve(obj.size);
    // SAFETY: `obj.size` words starting at `to` were reserved for this object
    unsafe {
        to.write(id);
        to.add(1).write(obj.size);
        for word in HEADER_WORDS..obj.size {
            to.add(word).write(id);
        }
    }
    obj.forward
        .store(to.as_ptr() as usize, Ordering::Release);
}

fn scavenge_object(
    ws: &mut Workspace<'_>,
    graph: &Graph,
    obj: NonNull<Word>,
) -> usize {
    // SAFETY: objects are written in full before their block can be scanned
    let (id, size) = unsafe { (obj.read(), obj.add(1).read()) };
    for &child in &graph.objects[id].children {
        evacuate(ws, graph, child);
    }
    size
}

/// Scavenges everything this worker can get hold of. Returns whether any
/// block was scanned.
fn scavenge_available(worker: &mut GcWorker<'_>, graph: &Graph) -> bool {
    let steps = worker.cycle().settings().step_count();
    let mut found = false;
    for step in 0..steps {
        while let Some(block) = worker.next_block(step) {
            worker
                .workspace_mut(step)
                .scavenge_block(block, |ws, obj| scavenge_object(ws, graph, obj));
            found = true;
        }
        let ws = worker.workspace_mut(step);
        if let Some(block) = ws.take_current_for_scan() {
            ws.scavenge_block(block, |ws, obj| scavenge_object(ws, graph, obj));
            found = true;
        }
    }
    found
}

/// Parks the worker until either some queue has work again (`true`) or
/// every worker is idle (`false`).
///
/// An idle worker owns no unscanned block, so once all of them are idle
/// there is nothing left to do.
fn wait_for_work(cycle: &Cycle, idle: &AtomicUsize) -> bool {
    let work = cycle.work();
    idle.fetch_add(1, Ordering::AcqRel);
    loop {
        if (0..work.step_count()).any(|step| !work.step(step).is_probably_empty()) {
            idle.fetch_sub(1, Ordering::AcqRel);
            return true;
        }
        if idle.load(Ordering::Acquire) == cycle.settings().workers {
            return false;
        }
        thread::yield_now();
    }
}

fn run_worker(
    cycle: &Cycle,
    queues: WorkerQueues,
    graph: &Graph,
    idle: &AtomicUsize,
) -> Result<(Vec<WorkspaceSummary>, Vec<RetiredBlocks>), SanityViolation> {
    let mut worker = GcWorker::new(cycle, queues);
    let workers = cycle.settings().workers;
    let steps = cycle.settings().step_count();

    for (n, &root) in graph
        .roots
        .iter()
        .enumerate()
        .skip(worker.index())
        .step_by(workers)
    {
        evacuate(worker.workspace_mut(n % steps), graph, root);
    }

    loop {
        if scavenge_available(&mut worker, graph) {
            continue;
        }
        if !wait_for_work(cycle, idle) {
            break;
        }
    }

    let mut summaries = Vec::with_capacity(steps);
    for ws in worker.workspaces() {
        if cycle.settings().sanity_checks {
            ws.check_sanity()?;
        }
        summaries.push(ws.summary());
    }
    log::debug!(
        "worker {} done, copied {} words",
        worker.index(),
        worker.copied_words()
    );
    Ok((summaries, worker.into_retired()))
}

/// Every reachable object must have a to-space copy carrying its id.
fn verify_copies(cycle: &Cycle, graph: &Graph, live: &[usize]) -> Result<(), DriverError> {
    for &id in live {
        let addr = graph.objects[id].forward.load(Ordering::Acquire);
        if addr <= BUSY || cycle.space().index_of(addr).is_none() {
            return Err(DriverError::NotEvacuated(id));
        }
        // SAFETY: `addr` is the start of a copy inside the mapped block space
        let header = unsafe { (addr as *const Word).read() };
        if header != id {
            return Err(DriverError::NotEvacuated(id));
        }
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), DriverError> {
    if cli.block_words <= MAX_OBJECT_WORDS {
        return Err(DriverError::BlockTooSmall(cli.block_words));
    }
    let settings = ScavengeSettings {
        block_words: cli.block_words,
        block_count: cli.blocks,
        work_unit_words: cli.work_unit,
        queue_capacity: cli.deque_capacity,
        workers: cli.workers,
        generations: cli.generations,
        steps_per_generation: 1,
        sanity_checks: cli.sanity,
    };
    let (cycle, queues) = Cycle::with_pool(settings)?;

    let graph = Graph::generate(cli.objects, cli.seed);
    let live = graph.reachable();
    let reachable: usize = live.iter().map(|&id| graph.objects[id].size).sum();
    log::info!(
        "{} objects, {} roots, {} live ({reachable} words)",
        graph.objects.len(),
        graph.roots.len(),
        live.len()
    );

    let idle = AtomicUsize::new(0);
    let start = Instant::now();
    let results = thread::scope(|s| {
        let handles: Vec<_> = queues
            .into_iter()
            .map(|queues| {
                let (cycle, graph, idle) = (&cycle, &graph, &idle);
                s.spawn(move || run_worker(cycle, queues, graph, idle))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect::<Vec<_>>()
    });
    let elapsed = start.elapsed();

    let mut retired = Vec::new();
    for result in results {
        let (summaries, blocks) = result?;
        for summary in summaries {
            println!("{summary}");
        }
        retired.extend(blocks);
    }

    let copied: usize = retired.iter().map(|blocks| blocks.copied).sum();
    let used: usize = retired.iter().map(RetiredBlocks::len).sum();
    println!(
        "copied {copied} words into {used} blocks with {} workers in {elapsed:?}",
        cli.workers
    );
    if copied != reachable {
        return Err(DriverError::CopiedMismatch { copied, reachable });
    }
    verify_copies(&cycle, &graph, &live)?;

    let gate = cycle.gate();
    let rest = gate.acquire_blocks(cycle.space(), gate.free_blocks());
    membership_census(cycle.space(), &rest, &retired)?;
    gate.release_chain(rest);
    gate.release_chain(merge_retired(cycle.space(), retired));

    let free = gate.free_blocks();
    if free != cycle.space().len() {
        return Err(DriverError::Leaked {
            free,
            total: cycle.space().len(),
        });
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}
