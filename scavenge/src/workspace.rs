//! Per worker, per step allocation state.
//!
//! A [`Workspace`] is where a collector thread copies objects of one step to.
//! It bump allocates inside its current ("todo") block and, once that block
//! is full, either grows the allocation limit in place or retires the block:
//! blocks that still hold unscanned objects are published to the step's work
//! queues, scanned ones are kept on the part or scavenged list.
//!
//! The same workspace also sits on the consuming side: blocks taken from the
//! queues are scavenged through it and classified when done.

use std::ptr::NonNull;

use crate::{
    Block, BlockList, BlockRef, BlockSpace, Cycle, NO_BLOCK, StepId, TodoQueue,
    Word,
};

#[derive(Debug)]
pub struct Workspace<'c> {
    cycle: &'c Cycle,
    worker: usize,
    /// Absolute step index.
    step: usize,
    id: StepId,

    /// Block currently receiving copies.
    todo: Option<BlockRef>,
    /// Mirror of the todo block's free cursor, ahead of the descriptor until
    /// the block is synced.
    todo_free: usize,
    /// Soft allocation limit inside the todo block.
    todo_lim: usize,

    todo_q: TodoQueue,
    /// Blocks that did not fit in `todo_q`.
    overflow: BlockList,
    /// Scanned blocks with room left for more copies.
    part: BlockList,
    /// Scanned blocks too full to be worth reusing.
    scavenged: BlockList,

    copied: usize,
}

/// Blocks a workspace still owns at the end of the cycle.
#[must_use]
#[derive(Debug)]
pub struct RetiredBlocks {
    pub step: StepId,
    pub current: Option<BlockRef>,
    pub part: BlockList,
    pub scavenged: BlockList,
    pub overflow: BlockList,
    /// Words copied through the workspace.
    pub copied: usize,
}

impl RetiredBlocks {
    /// Chains every block into one list.
    pub fn into_chain(self, space: &BlockSpace) -> BlockList {
        let Self {
            current,
            mut part,
            scavenged,
            overflow,
            ..
        } = self;
        part.prepend(space, scavenged);
        part.prepend(space, overflow);
        if let Some(block) = current {
            part.push(space, block);
        }
        part
    }

    pub fn len(&self) -> usize {
        self.part.len()
            + self.scavenged.len()
            + self.overflow.len()
            + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'c> Workspace<'c> {
    pub(crate) fn new(
        cycle: &'c Cycle,
        worker: usize,
        step: usize,
        todo_q: TodoQueue,
    ) -> Self {
        Self {
            cycle,
            worker,
            step,
            id: cycle.settings().step_id(step),
            todo: None,
            todo_free: 0,
            todo_lim: 0,
            todo_q,
            overflow: BlockList::new(),
            part: BlockList::new(),
            scavenged: BlockList::new(),
            copied: 0,
        }
    }

    #[inline]
    fn space(&self) -> &'c BlockSpace {
        self.cycle.space()
    }

    #[inline]
    fn work_unit(&self) -> usize {
        self.cycle.settings().work_unit_words
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// Reserves `size` contiguous words in the todo block.
    ///
    /// The region belongs to this workspace's step and never overlaps an
    /// earlier reservation. Panics unless `size` is smaller than a block.
    #[inline]
    pub fn reserve(&mut self, size: usize) -> NonNull<Word> {
        debug_assert!(
            size > 0 && size < self.space().block_words(),
            "reservation of {size} words does not fit a block"
        );
        if let Some(block) = self.todo_desc() {
            if self.todo_free + size <= self.todo_lim {
                return self.bump(block, size);
            }
        }
        self.todo_block_full(size)
    }

    #[inline]
    fn todo_desc(&self) -> Option<&'c Block> {
        let space = self.space();
        self.todo.as_ref().map(|todo| space.block(todo))
    }

    #[inline]
    fn bump(&mut self, block: &Block, size: usize) -> NonNull<Word> {
        debug_assert!(self.todo_free + size <= self.todo_lim);
        let ptr = block.word(self.todo_free);
        self.todo_free += size;
        ptr
    }

    /// Slow path of [`Self::reserve`].
    #[cold]
    #[inline(never)]
    fn todo_block_full(&mut self, size: usize) -> NonNull<Word> {
        assert!(
            size < self.space().block_words(),
            "reservation of {size} words does not fit a block of {} words",
            self.space().block_words()
        );
        if let Some(block) = self.todo_desc() {
            if self.extend_limit(block, size) {
                return self.bump(block, size);
            }
            self.retire_todo_block();
        }
        let block = self.alloc_todo_block(size);
        self.bump(block, size)
    }

    /// Raises the limit inside the todo block if there is no point in
    /// publishing it yet: the queue already has work for others, or the
    /// block holds too little unscanned work to be worth sharing.
    fn extend_limit(&mut self, block: &Block, size: usize) -> bool {
        let work_unit = self.work_unit();
        let queue_busy = !self.todo_q.is_probably_empty();
        let little_work = self.todo_free - block.scan() < work_unit;
        if !(queue_busy || little_work)
            || self.todo_free + size >= block.capacity()
        {
            return false;
        }

        self.todo_lim = block
            .capacity()
            .min(self.todo_lim + work_unit.max(size));
        log::trace!(
            "growing limit of todo block {:?} to {}",
            self.current_block(),
            self.todo_lim
        );
        true
    }

    /// Writes the mirrored free cursor back to the descriptor and accounts
    /// the words copied since the last sync.
    fn sync_todo_free(&mut self) {
        let Some(todo) = &self.todo else {
            return;
        };
        let block = self.space().block(todo);
        self.copied += self.todo_free - block.free();
        block.set_free(self.todo_free);
    }

    /// Moves the todo block out: scanned blocks are classified, blocks with
    /// pending work are published.
    fn retire_todo_block(&mut self) {
        self.sync_todo_free();
        let Some(todo) = self.todo.take() else {
            return;
        };
        self.todo_free = 0;
        self.todo_lim = 0;

        let block = self.space().block(&todo);
        debug_assert!(block.scan() <= block.free());
        if block.is_fully_scanned() {
            // a fresh block always fits the reservation, so this one has data
            debug_assert_ne!(block.free(), 0);
            self.push_scanned_block(todo);
        } else {
            log::debug!(
                "publishing todo block {} with {} unscanned words (step {}, {} queued)",
                todo.index(),
                block.unscanned(),
                self.id,
                self.todo_q.len()
            );
            self.publish(todo);
        }
    }

    /// Installs a new todo block able to hold `size` words, preferring the
    /// head of the part list over a fresh block.
    fn alloc_todo_block(&mut self, size: usize) -> &'c Block {
        debug_assert!(self.todo.is_none());
        let space = self.space();

        let reuse = self
            .part
            .peek(space)
            .is_some_and(|head| head.remaining() > size);
        let todo = match reuse.then(|| self.part.pop(space)).flatten() {
            Some(block) => block,
            None => self.fresh_block(),
        };

        let block = space.block(&todo);
        debug_assert_eq!(block.link(), NO_BLOCK);
        debug_assert_eq!(block.step_id(), self.id);
        self.todo_free = block.free();
        self.todo_lim = block
            .capacity()
            .min(block.free() + self.work_unit().max(size));
        log::trace!(
            "new todo block {} for step {} (free {}, limit {})",
            todo.index(),
            self.id,
            self.todo_free,
            self.todo_lim
        );
        self.todo = Some(todo);
        self.check_lists();
        block
    }

    fn fresh_block(&self) -> BlockRef {
        let block = self.cycle.gate().acquire_block();
        self.space().block(&block).stamp(self.id);
        block
    }

    /// Pre stocks the part list with `count` fresh blocks taken in one
    /// critical section.
    pub fn seed_part_list(&mut self, count: usize) {
        let space = self.space();
        let mut fresh = self.cycle.gate().acquire_blocks(space, count);
        while let Some(block) = fresh.pop(space) {
            space.block(&block).stamp(self.id);
            self.part.push(space, block);
        }
        self.check_lists();
    }

    // ── Work distribution ─────────────────────────────────────────────

    /// Offers a block with unscanned objects to the other workers.
    ///
    /// Spills to the overflow list when the todo queue is full.
    pub fn publish(&mut self, block: BlockRef) {
        let space = self.space();
        debug_assert_eq!(space.block(&block).link(), NO_BLOCK);
        if let Err(block) = self.todo_q.try_push(block) {
            log::debug!(
                "todo queue of step {} full, block {} overflows",
                self.id,
                block.index()
            );
            self.overflow.push(space, block);
            self.check_lists();
        }
    }

    /// Takes a block from this workspace: the most recent overflow first,
    /// then the own todo queue.
    pub fn acquire_local_work(&mut self) -> Option<BlockRef> {
        if let Some(block) = self.overflow.pop(self.space()) {
            return Some(block);
        }
        let block = self.todo_q.pop()?;
        debug_assert_eq!(self.space().block(&block).link(), NO_BLOCK);
        Some(block)
    }

    /// Takes a block from another worker of the same step.
    ///
    /// `None` does not mean the step is done, others may still be producing.
    pub fn steal_work(&self) -> Option<BlockRef> {
        self.cycle.work().steal(self.step, self.worker)
    }

    /// Hands out the todo block for scanning if it holds unscanned objects.
    ///
    /// Lets a worker that found no other work scavenge what it copied itself.
    /// The next reservation starts a new todo block.
    pub fn take_current_for_scan(&mut self) -> Option<BlockRef> {
        let todo = self.todo.as_ref()?;
        if self.todo_free == self.space().block(todo).scan() {
            return None;
        }
        self.sync_todo_free();
        self.todo_free = 0;
        self.todo_lim = 0;
        self.todo.take()
    }

    // ── Scavenging ────────────────────────────────────────────────────

    /// Files a fully scanned block on the part list if it still has more
    /// than a work unit of room, on the scavenged list otherwise.
    pub fn push_scanned_block(&mut self, block: BlockRef) {
        let space = self.space();
        let desc = space.block(&block);
        debug_assert_eq!(desc.link(), NO_BLOCK);
        debug_assert_eq!(desc.step_id(), self.id);
        debug_assert!(desc.is_fully_scanned());

        if desc.remaining() > self.work_unit() {
            self.part.push(space, block);
        } else {
            self.scavenged.push(space, block);
        }
        self.check_lists();
    }

    /// Scans `block` from its scan cursor up to its free cursor, then
    /// classifies it.
    ///
    /// `scavenge_object` is called with every object start and returns the
    /// object's size in words. It may copy further objects through this
    /// workspace.
    pub fn scavenge_block<F>(&mut self, block: BlockRef, mut scavenge_object: F)
    where
        F: FnMut(&mut Self, NonNull<Word>) -> usize,
    {
        let desc = self.space().block(&block);
        loop {
            let scan = desc.scan();
            let free = desc.free();
            if scan >= free {
                break;
            }
            let size = scavenge_object(self, desc.word(scan));
            debug_assert!(
                size > 0 && scan + size <= free,
                "object at {scan} of size {size} overruns block {}",
                block.index()
            );
            desc.set_scan(scan + size);
        }
        self.push_scanned_block(block);
    }

    // ── End of cycle ──────────────────────────────────────────────────

    /// Gives up every block this workspace owns.
    ///
    /// Blocks left in the todo queue are moved to the overflow list.
    pub fn into_retired(mut self) -> RetiredBlocks {
        self.sync_todo_free();
        let space = self.space();
        while let Some(block) = self.todo_q.pop() {
            self.overflow.push(space, block);
        }
        RetiredBlocks {
            step: self.id,
            current: self.todo.take(),
            part: std::mem::take(&mut self.part),
            scavenged: std::mem::take(&mut self.scavenged),
            overflow: std::mem::take(&mut self.overflow),
            copied: self.copied,
        }
    }

    // ── Introspection ─────────────────────────────────────────────────

    #[inline]
    pub fn worker(&self) -> usize {
        self.worker
    }

    #[inline]
    pub fn step(&self) -> usize {
        self.step
    }

    #[inline]
    pub fn step_id(&self) -> StepId {
        self.id
    }

    /// Index of the todo block.
    #[inline]
    pub fn current_block(&self) -> Option<usize> {
        self.todo.as_ref().map(BlockRef::index)
    }

    #[inline]
    pub fn todo_free(&self) -> usize {
        self.todo_free
    }

    #[inline]
    pub fn todo_limit(&self) -> usize {
        self.todo_lim
    }

    pub fn part_list(&self) -> &BlockList {
        &self.part
    }

    pub fn scavenged_list(&self) -> &BlockList {
        &self.scavenged
    }

    pub fn overflow_list(&self) -> &BlockList {
        &self.overflow
    }

    pub fn queued(&self) -> usize {
        self.todo_q.len()
    }

    /// Words copied through this workspace, up to the last sync of the todo
    /// block.
    #[inline]
    pub fn copied_words(&self) -> usize {
        self.copied
    }

    #[inline]
    fn check_lists(&self) {
        if self.cycle.settings().checks_enabled() {
            if let Err(err) = self.check_sanity() {
                panic!("workspace {}/{}: {err}", self.worker, self.id);
            }
        }
    }

    pub(crate) fn cycle(&self) -> &'c Cycle {
        self.cycle
    }

    pub(crate) fn lists(&self) -> [(&'static str, &BlockList); 3] {
        [
            ("part", &self.part),
            ("scavenged", &self.scavenged),
            ("overflow", &self.overflow),
        ]
    }

    pub(crate) fn todo_block(&self) -> Option<&BlockRef> {
        self.todo.as_ref()
    }
}
