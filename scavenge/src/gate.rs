use parking_lot::Mutex;

use crate::{BlockAllocator, BlockList, BlockRef, BlockSpace};

/// Serializes all calls into the block allocator.
///
/// The only blocking point of the subsystem. Exhausting the allocator is
/// fatal for the collection.
pub struct AllocGate {
    allocator: Mutex<Box<dyn BlockAllocator>>,
}

impl std::fmt::Debug for AllocGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocGate")
            .field("free_blocks", &self.free_blocks())
            .finish()
    }
}

impl AllocGate {
    pub fn new(allocator: impl BlockAllocator + 'static) -> Self {
        Self {
            allocator: Mutex::new(Box::new(allocator)),
        }
    }

    pub fn acquire_block(&self) -> BlockRef {
        let mut allocator = self.allocator.lock();
        match allocator.allocate_block() {
            Ok(block) => block,
            Err(err) => {
                log::error!("collection ran out of blocks: {err}");
                panic!("out of memory: {err}");
            }
        }
    }

    /// Takes `count` blocks in a single critical section.
    pub fn acquire_blocks(&self, space: &BlockSpace, count: usize) -> BlockList {
        let mut list = BlockList::new();
        let mut allocator = self.allocator.lock();
        for _ in 0..count {
            match allocator.allocate_block() {
                Ok(block) => list.push(space, block),
                Err(err) => {
                    log::error!(
                        "collection ran out of blocks after {} of {count}: {err}",
                        list.len()
                    );
                    panic!("out of memory: {err}");
                }
            }
        }
        list
    }

    pub fn release_chain(&self, chain: BlockList) {
        if chain.is_empty() {
            return;
        }
        self.allocator.lock().free_block_chain(chain);
    }

    pub fn free_blocks(&self) -> usize {
        self.allocator.lock().free_blocks()
    }
}
