use std::sync::Arc;

use crate::{BlockFlags, BlockList, BlockRef, BlockSpace, OutOfBlocks, SpaceError};

/// Source of fresh blocks for a collection cycle.
///
/// Implementations are not expected to be thread safe, every call is made
/// while holding the [`AllocGate`](crate::AllocGate) lock.
pub trait BlockAllocator: Send {
    /// Takes one block out of the pool. Its cursors are zero and its link is
    /// cleared.
    fn allocate_block(&mut self) -> Result<BlockRef, OutOfBlocks>;

    /// Returns every block of `chain` to the pool.
    fn free_block_chain(&mut self, chain: BlockList);

    /// Blocks currently in the pool.
    fn free_blocks(&self) -> usize;

    /// Space every handed out block belongs to.
    fn space(&self) -> &Arc<BlockSpace>;
}

/// LIFO free list over all blocks of a [`BlockSpace`].
#[derive(Debug)]
pub struct FreePool {
    space: Arc<BlockSpace>,
    free: BlockList,
}

impl FreePool {
    /// Takes ownership of every block in `space`. Fails if another pool
    /// already did.
    pub fn new(space: Arc<BlockSpace>) -> Result<Self, SpaceError> {
        let free = space.claim_blocks().ok_or(SpaceError::AlreadyClaimed)?;
        Ok(Self { space, free })
    }
}

impl BlockAllocator for FreePool {
    fn allocate_block(&mut self) -> Result<BlockRef, OutOfBlocks> {
        let block = self.free.pop(&self.space).ok_or(OutOfBlocks {
            total: self.space.len(),
        })?;
        let desc = self.space.block(&block);
        debug_assert!(desc.flags().contains(BlockFlags::FREE));
        desc.clear_flags(BlockFlags::FREE);
        Ok(block)
    }

    fn free_block_chain(&mut self, mut chain: BlockList) {
        let mut count = 0usize;
        while let Some(block) = chain.pop(&self.space) {
            self.space.block(&block).reset();
            self.free.push(&self.space, block);
            count += 1;
        }
        log::trace!("returned {count} blocks, {} free", self.free.len());
    }

    fn free_blocks(&self) -> usize {
        self.free.len()
    }

    fn space(&self) -> &Arc<BlockSpace> {
        &self.space
    }
}
