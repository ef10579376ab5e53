//! Work distribution between collector threads.
//!
//! Every worker owns one bounded todo queue per step and publishes
//! blocks that still need scavenging into it. Each step keeps a table with a
//! stealer for every worker's queue, so idle workers of the same step can
//! take blocks from their peers.

use crossbeam_deque::{Steal, Stealer, Worker};

use crate::BlockRef;

/// Owner side of a worker's todo queue for one step.
///
/// The owner pushes and pops at the same end, thieves take from the other.
#[derive(Debug)]
pub struct TodoQueue {
    deque: Worker<BlockRef>,
    capacity: usize,
}

impl TodoQueue {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            deque: Worker::new_lifo(),
            capacity,
        }
    }

    pub fn stealer(&self) -> Stealer<BlockRef> {
        self.deque.stealer()
    }

    /// Pushes unless the queue holds `capacity` blocks already, in which
    /// case the block is handed back.
    #[inline]
    pub fn try_push(&self, block: BlockRef) -> Result<(), BlockRef> {
        // thieves only shrink the queue, so the bound is never exceeded
        if self.deque.len() >= self.capacity {
            return Err(block);
        }
        self.deque.push(block);
        Ok(())
    }

    #[inline]
    pub fn pop(&self) -> Option<BlockRef> {
        self.deque.pop()
    }

    /// Racy emptiness check, only good for heuristics.
    #[inline]
    pub fn is_probably_empty(&self) -> bool {
        self.deque.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Stealers of all workers' todo queues for one step.
#[derive(Debug)]
pub struct StepWork {
    stealers: Box<[Stealer<BlockRef>]>,
}

impl StepWork {
    /// Tries each other worker once, starting right after `thief`.
    pub fn steal_for(&self, thief: usize) -> Option<BlockRef> {
        let n = self.stealers.len();
        debug_assert!(thief < n);
        for offset in 1..n {
            let victim = (thief + offset) % n;
            loop {
                match self.stealers[victim].steal() {
                    Steal::Success(block) => {
                        log::trace!(
                            "worker {thief} stole block {} from worker {victim}",
                            block.index()
                        );
                        return Some(block);
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    /// Whether every queue of the step looks empty.
    pub fn is_probably_empty(&self) -> bool {
        self.stealers.iter().all(Stealer::is_empty)
    }

    /// Blocks queued across all workers, racy.
    pub fn queued(&self) -> usize {
        self.stealers.iter().map(Stealer::len).sum()
    }

    pub fn workers(&self) -> usize {
        self.stealers.len()
    }
}

/// Per step stealer tables of one collection cycle.
#[derive(Debug)]
pub struct WorkDistribution {
    steps: Box<[StepWork]>,
}

impl WorkDistribution {
    /// Creates the queues for `workers` x `steps`.
    ///
    /// Returns the shared stealer tables together with the owner halves,
    /// indexed `[worker][step]`, which are moved into the workers.
    pub fn new(
        workers: usize,
        steps: usize,
        capacity: usize,
    ) -> (Self, Vec<Vec<TodoQueue>>) {
        let queues: Vec<Vec<TodoQueue>> = (0..workers)
            .map(|_| (0..steps).map(|_| TodoQueue::new(capacity)).collect())
            .collect();

        let steps = (0..steps)
            .map(|step| StepWork {
                stealers: queues
                    .iter()
                    .map(|per_worker| per_worker[step].stealer())
                    .collect(),
            })
            .collect();

        (Self { steps }, queues)
    }

    #[inline]
    pub fn step(&self, step: usize) -> &StepWork {
        &self.steps[step]
    }

    #[inline]
    pub fn steal(&self, step: usize, thief: usize) -> Option<BlockRef> {
        self.steps[step].steal_for(thief)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockList, BlockSpace};

    fn blocks(n: usize) -> (BlockSpace, BlockList) {
        let space = BlockSpace::with_geometry(n, 16).expect("space");
        let list = space.claim_blocks().expect("claim");
        (space, list)
    }

    #[test]
    fn test_bounded_push() {
        let (space, mut all) = blocks(3);
        let queue = TodoQueue::new(2);
        assert!(queue.try_push(all.pop(&space).unwrap()).is_ok());
        assert!(queue.try_push(all.pop(&space).unwrap()).is_ok());

        let rejected = queue.try_push(all.pop(&space).unwrap());
        assert_eq!(rejected.map_err(|b| b.index()), Err(2));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_owner_pops_lifo() {
        let (space, mut all) = blocks(2);
        let queue = TodoQueue::new(4);
        queue.try_push(all.pop(&space).unwrap()).unwrap();
        queue.try_push(all.pop(&space).unwrap()).unwrap();
        assert_eq!(queue.pop().map(|b| b.index()), Some(1));
        assert_eq!(queue.pop().map(|b| b.index()), Some(0));
        assert!(queue.pop().is_none());
        assert!(queue.is_probably_empty());
    }

    #[test]
    fn test_steal_skips_thief_and_wraps() {
        let (space, mut all) = blocks(2);
        let (work, queues) = WorkDistribution::new(3, 1, 8);

        // only worker 0 and worker 1 have work
        queues[0][0].try_push(all.pop(&space).unwrap()).unwrap();
        queues[1][0].try_push(all.pop(&space).unwrap()).unwrap();

        // worker 1 looks at 2, then wraps to 0, never at itself
        assert_eq!(work.steal(0, 1).map(|b| b.index()), Some(0));
        assert_eq!(work.steal(0, 1), None);
        assert_eq!(queues[1][0].len(), 1);

        // worker 2 starts at 0, which is empty now, then 1
        assert_eq!(work.steal(0, 2).map(|b| b.index()), Some(1));
        assert!(work.step(0).is_probably_empty());
    }

    #[test]
    fn test_steps_are_separate() {
        let (space, mut all) = blocks(1);
        let (work, queues) = WorkDistribution::new(2, 2, 8);
        queues[0][1].try_push(all.pop(&space).unwrap()).unwrap();

        assert_eq!(work.steal(0, 1), None);
        assert_eq!(work.step(1).queued(), 1);
        assert!(work.steal(1, 1).is_some());
    }

    #[test]
    fn test_single_worker_never_steals() {
        let (space, mut all) = blocks(1);
        let (work, queues) = WorkDistribution::new(1, 1, 8);
        queues[0][0].try_push(all.pop(&space).unwrap()).unwrap();
        assert_eq!(work.steal(0, 0), None);
    }
}
