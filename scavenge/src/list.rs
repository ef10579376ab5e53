use crate::{Block, BlockRef, BlockSpace, NO_BLOCK};

/// Singly linked chain of blocks threaded through the descriptors' `link`
/// field.
///
/// Pushing consumes the block's handle and popping hands it back, so a block
/// is on at most one list. The length is kept in lockstep with the chain and
/// is only used for accounting and sanity checks.
#[must_use]
#[derive(Debug, Default)]
pub struct BlockList {
    head: Option<usize>,
    len: usize,
}

impl BlockList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Prepends `block`.
    pub fn push(&mut self, space: &BlockSpace, block: BlockRef) {
        let desc = space.block(&block);
        debug_assert_eq!(
            desc.link(),
            NO_BLOCK,
            "block {} is already linked",
            block.index()
        );
        desc.set_link(self.head.unwrap_or(NO_BLOCK));
        self.head = Some(block.into_index());
        self.len += 1;
    }

    /// Unlinks the head.
    pub fn pop(&mut self, space: &BlockSpace) -> Option<BlockRef> {
        let head = self.head?;
        let desc = space.by_index(head);
        let next = desc.link();
        desc.set_link(NO_BLOCK);
        self.head = (next != NO_BLOCK).then_some(next);
        self.len -= 1;
        Some(BlockRef::from_index(head))
    }

    #[inline]
    pub fn peek<'s>(&self, space: &'s BlockSpace) -> Option<&'s Block> {
        self.head.map(|idx| space.by_index(idx))
    }

    /// Moves every block of `other` in front of this list.
    pub fn prepend(&mut self, space: &BlockSpace, other: BlockList) {
        let Some(other_head) = other.head else {
            return;
        };
        let mut tail = other_head;
        loop {
            let next = space.by_index(tail).link();
            if next == NO_BLOCK {
                break;
            }
            tail = next;
        }
        space
            .by_index(tail)
            .set_link(self.head.unwrap_or(NO_BLOCK));
        self.head = Some(other_head);
        self.len += other.len;
    }

    /// Walks the chain, yielding `(index, descriptor)` pairs head first.
    pub fn iter<'s>(
        &self,
        space: &'s BlockSpace,
    ) -> impl Iterator<Item = (usize, &'s Block)> + 's {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let desc = space.by_index(idx);
            let next = desc.link();
            cursor = (next != NO_BLOCK).then_some(next);
            Some((idx, desc))
        })
    }

    /// Blocks reachable from the head, independent of the recorded length.
    pub fn count_linked(&self, space: &BlockSpace) -> usize {
        self.iter(space).count()
    }
}
