//! Block descriptors and the space that owns them.
//!
//! A [`BlockSpace`] maps one contiguous region and carves it into blocks of
//! `block_words` words. Every block has a descriptor in the space's arena;
//! a [`BlockRef`] is the only way to name a block for mutation, and since it
//! cannot be cloned, holding one means owning the block.

use std::{
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicUsize, Ordering},
};

use bitflags::bitflags;

use crate::{
    BlockList, ScavengeSettings, SettingsError, SpaceError,
    system::MappedRegion,
};

pub type Word = usize;
pub const WORD_SIZE: usize = size_of::<Word>();
/// Default block size, 32 KB with 64 bit words.
pub const BLOCK_WORDS: usize = 4096;
/// Link value of a block that is not linked to a successor.
pub const NO_BLOCK: usize = usize::MAX;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        /// Block sits in the free pool.
        const FREE = 1 << 0;
        /// Block is a to-space block receiving evacuated objects.
        const EVACUATED = 1 << 1;
    }
}

/// Generation and step a block's contents belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StepId {
    pub generation: u16,
    pub number: u16,
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.generation, self.number)
    }
}

/// Owned handle to a block of a [`BlockSpace`].
#[must_use]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BlockRef(usize);

impl BlockRef {
    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert_ne!(index, NO_BLOCK);
        Self(index)
    }

    #[inline]
    pub(crate) fn into_index(self) -> usize {
        self.0
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Descriptor of a single block.
///
/// Cursors are word offsets from `start`. Only the owner of the block's
/// [`BlockRef`] writes them; ownership moves through the todo queues or the
/// allocation gate, both of which order the accesses, so the fields are
/// relaxed atomics.
#[derive(Debug)]
pub struct Block {
    start: NonNull<Word>,
    capacity: usize,
    free: AtomicUsize,
    scan: AtomicUsize,
    /// Intrusive list link, index of the next block or `NO_BLOCK`.
    link: AtomicUsize,
    generation: AtomicU16,
    step: AtomicU16,
    flags: AtomicU8,
}

// SAFETY: all mutable state is atomic, `start` never changes
unsafe impl Send for Block {}
// SAFETY: see above
unsafe impl Sync for Block {}

impl Block {
    fn new(start: NonNull<Word>, capacity: usize) -> Self {
        Self {
            start,
            capacity,
            free: AtomicUsize::new(0),
            scan: AtomicUsize::new(0),
            link: AtomicUsize::new(NO_BLOCK),
            generation: AtomicU16::new(0),
            step: AtomicU16::new(0),
            flags: AtomicU8::new(BlockFlags::FREE.bits()),
        }
    }

    #[inline]
    pub fn start(&self) -> NonNull<Word> {
        self.start
    }

    /// Words in the block.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.free.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn scan(&self) -> usize {
        self.scan.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn link(&self) -> usize {
        self.link.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn step_id(&self) -> StepId {
        StepId {
            generation: self.generation.load(Ordering::Relaxed),
            number: self.step.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn flags(&self) -> BlockFlags {
        BlockFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    /// Words left behind the free cursor.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.free()
    }

    /// Words copied into the block but not yet scavenged.
    #[inline]
    pub fn unscanned(&self) -> usize {
        self.free() - self.scan()
    }

    #[inline]
    pub fn is_fully_scanned(&self) -> bool {
        self.scan() == self.free()
    }

    /// Address of the word at `offset`.
    #[inline]
    pub fn word(&self, offset: usize) -> NonNull<Word> {
        assert!(offset <= self.capacity, "offset {offset} outside block");
        // SAFETY: offset is within the block, one past the end included
        unsafe { self.start.add(offset) }
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.start.as_ptr() as usize;
        addr >= start && addr < start + self.capacity * WORD_SIZE
    }

    #[inline]
    pub(crate) fn set_free(&self, free: usize) {
        debug_assert!(
            self.scan() <= free && free <= self.capacity,
            "free {free} out of order (scan {}, capacity {})",
            self.scan(),
            self.capacity
        );
        self.free.store(free, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_scan(&self, scan: usize) {
        debug_assert!(
            scan <= self.free(),
            "scan {scan} beyond free {}",
            self.free()
        );
        self.scan.store(scan, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_link(&self, link: usize) {
        self.link.store(link, Ordering::Relaxed);
    }

    /// Prepares a block fresh from the pool to receive evacuated objects.
    pub(crate) fn stamp(&self, step: StepId) {
        self.generation.store(step.generation, Ordering::Relaxed);
        self.step.store(step.number, Ordering::Relaxed);
        self.flags
            .store(BlockFlags::EVACUATED.bits(), Ordering::Relaxed);
        self.scan.store(0, Ordering::Relaxed);
        self.free.store(0, Ordering::Relaxed);
    }

    /// Returns the descriptor to its pooled state.
    pub(crate) fn reset(&self) {
        self.generation.store(0, Ordering::Relaxed);
        self.step.store(0, Ordering::Relaxed);
        self.flags.store(BlockFlags::FREE.bits(), Ordering::Relaxed);
        self.scan.store(0, Ordering::Relaxed);
        self.free.store(0, Ordering::Relaxed);
        self.link.store(NO_BLOCK, Ordering::Relaxed);
    }

    pub(crate) fn clear_flags(&self, flags: BlockFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Relaxed);
    }
}

/// Arena of block descriptors over one mapped region.
#[derive(Debug)]
pub struct BlockSpace {
    region: MappedRegion,
    block_words: usize,
    blocks: Box<[Block]>,
    claimed: AtomicBool,
}

impl BlockSpace {
    pub fn new(settings: &ScavengeSettings) -> Result<Self, SpaceError> {
        settings.validate()?;
        Self::with_geometry(settings.block_count, settings.block_words)
    }

    pub fn with_geometry(
        block_count: usize,
        block_words: usize,
    ) -> Result<Self, SpaceError> {
        if block_count == 0 {
            return Err(SettingsError::Zero("block_count").into());
        }
        if block_words == 0 {
            return Err(SettingsError::Zero("block_words").into());
        }
        let bytes = block_count
            .checked_mul(block_words)
            .and_then(|words| words.checked_mul(WORD_SIZE))
            .ok_or(SettingsError::SpaceTooLarge {
                blocks: block_count,
                block_words,
            })?;
        let region =
            MappedRegion::new(bytes).ok_or(SpaceError::MapFailed { bytes })?;

        let base = region.start().cast::<Word>();
        let blocks = (0..block_count)
            .map(|idx| {
                // SAFETY: idx * block_words words are within the region
                let start = unsafe { base.add(idx * block_words) };
                Block::new(start, block_words)
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        log::debug!(
            "mapped block space: {block_count} blocks of {block_words} words at {:p}",
            base
        );

        Ok(Self {
            region,
            block_words,
            blocks,
            claimed: AtomicBool::new(false),
        })
    }

    /// Hands out every block as one list. Succeeds once per space, the
    /// caller becomes the sole source of block handles.
    pub(crate) fn claim_blocks(&self) -> Option<BlockList> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let mut list = BlockList::new();
        for idx in (0..self.blocks.len()).rev() {
            list.push(self, BlockRef::from_index(idx));
        }
        Some(list)
    }

    /// Descriptor of `block`. Panics if the handle belongs to a larger
    /// space.
    #[inline]
    pub fn block(&self, block: &BlockRef) -> &Block {
        &self.blocks[block.0]
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    #[inline]
    pub(crate) fn by_index(&self, index: usize) -> &Block {
        &self.blocks[index]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn block_words(&self) -> usize {
        self.block_words
    }

    /// Index of the block containing `addr`.
    pub fn index_of(&self, addr: usize) -> Option<usize> {
        if !self.region.contains(addr) {
            return None;
        }
        let offset = addr - self.region.start().as_ptr() as usize;
        let idx = offset / (self.block_words * WORD_SIZE);
        (idx < self.blocks.len()).then_some(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Block)> {
        self.blocks.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_tile_region() {
        let space = BlockSpace::with_geometry(4, 16).expect("space");
        assert_eq!(space.len(), 4);
        let base = space.get(0).unwrap().start().as_ptr() as usize;
        for (idx, block) in space.iter() {
            assert_eq!(
                block.start().as_ptr() as usize,
                base + idx * 16 * WORD_SIZE
            );
            assert_eq!(block.capacity(), 16);
            assert_eq!(block.link(), NO_BLOCK);
            assert!(block.flags().contains(BlockFlags::FREE));
        }
    }

    #[test]
    fn test_index_of() {
        let space = BlockSpace::with_geometry(4, 16).expect("space");
        let b2 = space.get(2).unwrap();
        let addr = b2.word(5).as_ptr() as usize;
        assert_eq!(space.index_of(addr), Some(2));
        assert!(b2.contains(addr));
        assert!(!space.get(1).unwrap().contains(addr));
        assert_eq!(space.index_of(0), None);
    }

    #[test]
    fn test_claim_once() {
        let space = BlockSpace::with_geometry(3, 16).expect("space");
        let mut list = space.claim_blocks().expect("first claim");
        assert_eq!(list.len(), 3);
        assert!(space.claim_blocks().is_none());

        assert_eq!(list.pop(&space).map(|b| b.index()), Some(0));
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn test_handle_beyond_space_is_rejected() {
        let big = BlockSpace::with_geometry(8, 16).expect("big");
        let small = BlockSpace::with_geometry(2, 16).expect("small");
        let mut blocks = big.claim_blocks().expect("claim");
        let far = (0..5).filter_map(|_| blocks.pop(&big)).last().unwrap();
        assert_eq!(far.index(), 4);
        let _ = small.block(&far);
    }

    #[test]
    fn test_stamp_and_reset() {
        let space = BlockSpace::with_geometry(1, 16).expect("space");
        let block = space.get(0).unwrap();
        block.set_free(3);
        block.stamp(StepId {
            generation: 1,
            number: 0,
        });
        assert_eq!(block.free(), 0);
        assert_eq!(block.flags(), BlockFlags::EVACUATED);
        assert_eq!(block.step_id().generation, 1);

        block.set_free(10);
        block.set_scan(4);
        assert_eq!(block.unscanned(), 6);
        assert_eq!(block.remaining(), 6);

        block.reset();
        assert_eq!(block.free(), 0);
        assert_eq!(block.scan(), 0);
        assert_eq!(block.flags(), BlockFlags::FREE);
    }
}
