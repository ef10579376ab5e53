use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use scavenge::{
    BlockList, Cycle, GcWorker, RetiredBlocks, ScavengeSettings, membership_census,
};

fn create_settings(workers: usize) -> ScavengeSettings {
    ScavengeSettings {
        block_words: 64,
        block_count: 2048,
        work_unit_words: 8,
        queue_capacity: 4,
        workers,
        generations: 1,
        steps_per_generation: 1,
        sanity_checks: false,
    }
}

#[test]
fn test_concurrent_publish_and_steal_exactly_once() {
    const WORKERS: usize = 4;
    const PER_WORKER: usize = 32;
    let total = WORKERS * PER_WORKER;

    let (cycle, queues) = Cycle::with_pool(create_settings(WORKERS)).expect("cycle");
    let retrieved = AtomicUsize::new(0);
    let seen = Mutex::new(vec![0usize; cycle.space().len()]);

    thread::scope(|s| {
        for queues in queues {
            let (cycle, retrieved, seen) = (&cycle, &retrieved, &seen);
            s.spawn(move || {
                let mut worker = GcWorker::new(cycle, queues);
                // retrieved blocks are kept until the end so indices stay unique
                let mut mine = BlockList::new();
                let mut take = |worker: &mut GcWorker<'_>| {
                    let Some(block) = worker.next_block(0) else {
                        return false;
                    };
                    seen.lock()[block.index()] += 1;
                    retrieved.fetch_add(1, Ordering::AcqRel);
                    mine.push(cycle.space(), block);
                    true
                };

                for i in 0..PER_WORKER {
                    let block = cycle.gate().acquire_block();
                    worker.workspace_mut(0).publish(block);
                    if i % 3 == 0 {
                        take(&mut worker);
                    }
                }
                while retrieved.load(Ordering::Acquire) < total {
                    if !take(&mut worker) {
                        thread::yield_now();
                    }
                }
                cycle.gate().release_chain(mine);
            });
        }
    });

    assert_eq!(retrieved.load(Ordering::Acquire), total);
    let counts = seen.into_inner();
    assert!(counts.iter().all(|&count| count <= 1));
    assert_eq!(counts.iter().sum::<usize>(), total);
    assert_eq!(cycle.gate().free_blocks(), cycle.space().len());
}

#[test]
fn test_parallel_scavenging_scans_every_word() {
    const WORKERS: usize = 4;
    const OBJECTS: usize = 2_000;

    let (cycle, queues) = Cycle::with_pool(create_settings(WORKERS)).expect("cycle");

    let sizes_of = |worker: usize| {
        let mut seed = 0x5eed_u64 + worker as u64;
        (0..OBJECTS)
            .map(move |_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                1 + ((seed >> 32) % 12) as usize
            })
            .collect::<Vec<_>>()
    };
    let expected: usize = (0..WORKERS).map(|w| sizes_of(w).iter().sum::<usize>()).sum();

    let scanned = AtomicUsize::new(0);
    let retired: Vec<RetiredBlocks> = thread::scope(|s| {
        let handles: Vec<_> = queues
            .into_iter()
            .map(|queues| {
                let (cycle, scanned, sizes_of) = (&cycle, &scanned, &sizes_of);
                s.spawn(move || {
                    let mut worker = GcWorker::new(cycle, queues);
                    for size in sizes_of(worker.index()) {
                        let obj = worker.reserve(0, size);
                        // SAFETY: `size` words were reserved
                        unsafe { obj.write(size) };
                    }

                    let scan_object = |_: &mut scavenge::Workspace<'_>,
                                       obj: std::ptr::NonNull<scavenge::Word>| {
                        // SAFETY: every object starts with its size
                        let size = unsafe { obj.read() };
                        scanned.fetch_add(size, Ordering::AcqRel);
                        size
                    };
                    while scanned.load(Ordering::Acquire) < expected {
                        if let Some(block) = worker.next_block(0) {
                            worker.workspace_mut(0).scavenge_block(block, scan_object);
                            continue;
                        }
                        let ws = worker.workspace_mut(0);
                        match ws.take_current_for_scan() {
                            Some(block) => ws.scavenge_block(block, scan_object),
                            None => thread::yield_now(),
                        }
                    }
                    worker.into_retired()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("worker panicked"))
            .collect()
    });

    assert_eq!(scanned.load(Ordering::Acquire), expected);
    let copied: usize = retired.iter().map(|blocks| blocks.copied).sum();
    assert_eq!(copied, expected);

    let gate = cycle.gate();
    let rest = gate.acquire_blocks(cycle.space(), gate.free_blocks());
    assert_eq!(membership_census(cycle.space(), &rest, &retired), Ok(()));
    gate.release_chain(rest);
    for blocks in retired {
        assert!(blocks.overflow.is_empty());
        cycle.release(blocks);
    }
    assert_eq!(gate.free_blocks(), cycle.space().len());
}
