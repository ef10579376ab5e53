use std::collections::HashSet;
use std::ptr::NonNull;

use scavenge::{
    BlockRef, Cycle, GcWorker, ScavengeSettings, WORD_SIZE, Word, WorkerQueues,
    Workspace,
};

fn create_settings(workers: usize, queue_capacity: usize) -> ScavengeSettings {
    ScavengeSettings {
        block_words: 16,
        block_count: 32,
        work_unit_words: 4,
        queue_capacity,
        workers,
        generations: 1,
        steps_per_generation: 1,
        sanity_checks: true,
    }
}

fn single_worker(cycle: &Cycle, queues: Vec<WorkerQueues>) -> GcWorker<'_> {
    let queues = queues.into_iter().next().expect("one worker");
    GcWorker::new(cycle, queues)
}

fn one_word_objects(_: &mut Workspace<'_>, _: NonNull<Word>) -> usize {
    1
}

fn addr(ptr: NonNull<Word>) -> usize {
    ptr.as_ptr() as usize
}

#[test]
fn test_overflowing_reservation_rotates_block() {
    let (cycle, queues) = Cycle::with_pool(create_settings(1, 8)).expect("cycle");
    let mut worker = single_worker(&cycle, queues);
    let ws = worker.workspace_mut(0);

    let a = ws.reserve(3);
    assert_eq!(ws.todo_limit(), 4);
    let b = ws.reserve(3);
    assert_eq!(addr(b), addr(a) + 3 * WORD_SIZE);
    assert_eq!(ws.todo_limit(), 8);
    let first = ws.current_block().expect("todo block");

    let c = ws.reserve(12);
    let second = ws.current_block().expect("new todo block");
    assert_ne!(first, second);
    assert_eq!(addr(c), addr(cycle.space().get(second).unwrap().start()));

    // the old block was published with nothing scanned yet
    let old = cycle.space().get(first).unwrap();
    assert_eq!(old.free(), 6);
    assert_eq!(old.scan(), 0);
    assert_eq!(ws.queued(), 1);
    assert!(ws.part_list().is_empty());
    assert!(ws.scavenged_list().is_empty());
}

#[test]
fn test_peer_steals_every_published_block_once() {
    let (cycle, mut queues) = Cycle::with_pool(create_settings(2, 8)).expect("cycle");
    let thief_queues = queues.pop().unwrap();
    let owner_queues = queues.pop().unwrap();
    let mut owner = GcWorker::new(&cycle, owner_queues);
    let thief = GcWorker::new(&cycle, thief_queues);

    let mut published = HashSet::new();
    for _ in 0..3 {
        let block = cycle.gate().acquire_block();
        published.insert(block.index());
        owner.workspace_mut(0).publish(block);
    }

    let mut stolen = HashSet::new();
    for _ in 0..3 {
        let block = thief.steal_work(0).expect("a published block");
        assert!(stolen.insert(block.index()));
    }
    assert_eq!(stolen, published);
    assert!(thief.steal_work(0).is_none());
    assert!(owner.acquire_local_work(0).is_none());
}

#[test]
fn test_nearly_full_scanned_block_is_scavenged() {
    let (cycle, queues) = Cycle::with_pool(create_settings(1, 8)).expect("cycle");
    let mut worker = single_worker(&cycle, queues);
    let ws = worker.workspace_mut(0);

    ws.reserve(14);
    let block = ws.take_current_for_scan().expect("unscanned block");
    let idx = block.index();
    ws.scavenge_block(block, one_word_objects);

    let desc = cycle.space().get(idx).unwrap();
    assert_eq!((desc.scan(), desc.free()), (14, 14));
    assert_eq!(ws.scavenged_list().len(), 1);
    assert!(ws.part_list().is_empty());
}

#[test]
fn test_full_queue_spills_to_overflow_first_out() {
    let (cycle, queues) = Cycle::with_pool(create_settings(1, 2)).expect("cycle");
    let mut worker = single_worker(&cycle, queues);
    let ws = worker.workspace_mut(0);

    let blocks: Vec<BlockRef> = (0..5).map(|_| cycle.gate().acquire_block()).collect();
    let order: Vec<usize> = blocks.iter().map(BlockRef::index).collect();
    for block in blocks {
        ws.publish(block);
    }
    assert_eq!(ws.queued(), 2);
    assert_eq!(ws.overflow_list().len(), 3);
    assert_eq!(cycle.work().step(0).queued(), 2);

    // spilled blocks come back newest first, before the queue is touched
    for (taken, &expected) in [order[4], order[3], order[2]].iter().enumerate() {
        let block = ws.acquire_local_work().expect("overflow block");
        assert_eq!(block.index(), expected);
        assert_eq!(ws.overflow_list().len(), 2 - taken);
        assert_eq!(ws.queued(), 2);
    }

    // then the queue, owner side last in first out
    let block = ws.acquire_local_work().expect("queued block");
    assert_eq!(block.index(), order[1]);
    let block = ws.acquire_local_work().expect("queued block");
    assert_eq!(block.index(), order[0]);
    assert!(ws.acquire_local_work().is_none());
    assert_eq!(ws.queued(), 0);
}

#[test]
fn test_classifier_threshold() {
    let (cycle, queues) = Cycle::with_pool(create_settings(1, 8)).expect("cycle");
    let mut worker = single_worker(&cycle, queues);
    let ws = worker.workspace_mut(0);

    // remaining 5, 4 and 3 words against a work unit of 4
    for (size, part, scavenged) in [(11, 1, 0), (12, 1, 1), (13, 1, 2)] {
        ws.reserve(size);
        let block = ws.take_current_for_scan().expect("unscanned block");
        ws.scavenge_block(block, one_word_objects);
        assert_eq!(ws.part_list().len(), part, "after {size} words");
        assert_eq!(ws.scavenged_list().len(), scavenged, "after {size} words");
    }
}

#[test]
fn test_copied_words_cover_every_reservation() {
    let (cycle, queues) = Cycle::with_pool(create_settings(1, 8)).expect("cycle");
    let mut worker = single_worker(&cycle, queues);

    let sizes = [3, 5, 7, 2, 9, 1, 15, 4, 4, 4, 11];
    for size in sizes {
        worker.reserve(0, size);
    }
    let retired = worker.into_retired();
    let copied: usize = retired.iter().map(|blocks| blocks.copied).sum();
    assert_eq!(copied, sizes.iter().sum::<usize>());

    for blocks in retired {
        cycle.release(blocks);
    }
    assert_eq!(cycle.gate().free_blocks(), 32);
}
