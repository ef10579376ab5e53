use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{
    AllocGate, BlockAllocator, BlockList, BlockRef, BlockSpace, FreePool,
    RetiredBlocks, ScavengeSettings, SettingsError, SpaceError, TodoQueue,
    WorkDistribution, Workspace,
};

static NEXT_CYCLE: AtomicUsize = AtomicUsize::new(0);

/// State shared by all workers of one collection cycle.
#[derive(Debug)]
pub struct Cycle {
    id: usize,
    settings: ScavengeSettings,
    space: Arc<BlockSpace>,
    gate: AllocGate,
    work: WorkDistribution,
}

/// Owner halves of one worker's todo queues, one per step.
#[derive(Debug)]
pub struct WorkerQueues {
    cycle: usize,
    worker: usize,
    queues: Vec<TodoQueue>,
}

impl WorkerQueues {
    pub fn worker(&self) -> usize {
        self.worker
    }
}

impl Cycle {
    /// Sets up a cycle over `space`, taking blocks from `allocator`, which
    /// must allocate from that same space.
    ///
    /// The returned queues must be handed to [`GcWorker::new`], one per
    /// worker thread.
    pub fn new(
        settings: ScavengeSettings,
        space: Arc<BlockSpace>,
        allocator: impl BlockAllocator + 'static,
    ) -> Result<(Self, Vec<WorkerQueues>), SpaceError> {
        settings.validate()?;
        if space.block_words() != settings.block_words {
            return Err(SettingsError::GeometryMismatch {
                expected: settings.block_words,
                found: space.block_words(),
            }
            .into());
        }
        if !Arc::ptr_eq(&space, allocator.space()) {
            return Err(SpaceError::ForeignAllocator);
        }

        let id = NEXT_CYCLE.fetch_add(1, Ordering::Relaxed);

        let (work, queues) = WorkDistribution::new(
            settings.workers,
            settings.step_count(),
            settings.queue_capacity,
        );
        let queues = queues
            .into_iter()
            .enumerate()
            .map(|(worker, queues)| WorkerQueues {
                cycle: id,
                worker,
                queues,
            })
            .collect();

        log::debug!(
            "collection cycle: {} workers, {} steps, {} free blocks",
            settings.workers,
            settings.step_count(),
            allocator.free_blocks()
        );

        let cycle = Self {
            id,
            settings,
            space,
            gate: AllocGate::new(allocator),
            work,
        };
        Ok((cycle, queues))
    }

    /// Maps a fresh block space sized by `settings` and pools all of it.
    pub fn with_pool(
        settings: ScavengeSettings,
    ) -> Result<(Self, Vec<WorkerQueues>), SpaceError> {
        let space = Arc::new(BlockSpace::new(&settings)?);
        let pool = FreePool::new(space.clone())?;
        Self::new(settings, space, pool)
    }

    #[inline]
    pub fn settings(&self) -> &ScavengeSettings {
        &self.settings
    }

    #[inline]
    pub fn space(&self) -> &BlockSpace {
        &self.space
    }

    #[inline]
    pub fn gate(&self) -> &AllocGate {
        &self.gate
    }

    #[inline]
    pub fn work(&self) -> &WorkDistribution {
        &self.work
    }

    /// Returns every block a workspace retired to the pool.
    pub fn release(&self, retired: RetiredBlocks) {
        let chain = retired.into_chain(&self.space);
        self.gate.release_chain(chain);
    }
}

/// One collector thread's view of the cycle: a workspace per step.
#[derive(Debug)]
pub struct GcWorker<'c> {
    cycle: &'c Cycle,
    index: usize,
    workspaces: Box<[Workspace<'c>]>,
}

impl<'c> GcWorker<'c> {
    /// Panics if `queues` were created by another cycle.
    pub fn new(cycle: &'c Cycle, queues: WorkerQueues) -> Self {
        let WorkerQueues {
            cycle: owner,
            worker,
            queues,
        } = queues;
        assert_eq!(owner, cycle.id, "worker queues belong to another cycle");
        debug_assert_eq!(queues.len(), cycle.settings.step_count());
        let workspaces = queues
            .into_iter()
            .enumerate()
            .map(|(step, queue)| Workspace::new(cycle, worker, step, queue))
            .collect();
        Self {
            cycle,
            index: worker,
            workspaces,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn cycle(&self) -> &'c Cycle {
        self.cycle
    }

    #[inline]
    pub fn workspace(&self, step: usize) -> &Workspace<'c> {
        &self.workspaces[step]
    }

    #[inline]
    pub fn workspace_mut(&mut self, step: usize) -> &mut Workspace<'c> {
        &mut self.workspaces[step]
    }

    pub fn workspaces(&self) -> &[Workspace<'c>] {
        &self.workspaces
    }

    #[inline]
    pub fn reserve(
        &mut self,
        step: usize,
        size: usize,
    ) -> std::ptr::NonNull<crate::Word> {
        self.workspaces[step].reserve(size)
    }

    pub fn acquire_local_work(&mut self, step: usize) -> Option<BlockRef> {
        self.workspaces[step].acquire_local_work()
    }

    pub fn steal_work(&self, step: usize) -> Option<BlockRef> {
        self.workspaces[step].steal_work()
    }

    /// Next block to scavenge for `step`: local work first, then a peer's.
    pub fn next_block(&mut self, step: usize) -> Option<BlockRef> {
        self.acquire_local_work(step)
            .or_else(|| self.steal_work(step))
    }

    /// Words copied by this worker over all steps.
    pub fn copied_words(&self) -> usize {
        self.workspaces.iter().map(Workspace::copied_words).sum()
    }

    pub fn into_retired(self) -> Vec<RetiredBlocks> {
        self.workspaces
            .into_vec()
            .into_iter()
            .map(Workspace::into_retired)
            .collect()
    }
}

/// Returns the chain of all blocks a set of retired workspaces still holds.
pub fn merge_retired(
    space: &BlockSpace,
    retired: Vec<RetiredBlocks>,
) -> BlockList {
    let mut all = BlockList::new();
    for blocks in retired {
        all.prepend(space, blocks.into_chain(space));
    }
    all
}
