use thiserror::Error;

/// Rejected [`ScavengeSettings`](crate::ScavengeSettings).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("{0} must be > 0")]
    Zero(&'static str),
    #[error("work unit ({work_unit} words) must be smaller than a block ({block_words} words)")]
    WorkUnitTooLarge { work_unit: usize, block_words: usize },
    #[error("block space of {blocks} blocks x {block_words} words overflows the address space")]
    SpaceTooLarge { blocks: usize, block_words: usize },
    #[error("too many steps ({0}), step numbers must fit in 16 bits")]
    TooManySteps(usize),
    #[error("settings expect {expected} words per block, block space has {found}")]
    GeometryMismatch { expected: usize, found: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpaceError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("could not map {bytes} bytes for the block space")]
    MapFailed { bytes: usize },
    #[error("blocks of this space are already owned by a pool")]
    AlreadyClaimed,
    #[error("allocator hands out blocks of a different block space")]
    ForeignAllocator,
}

/// The block allocator has no free block left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("out of blocks ({total} blocks in space, none free)")]
pub struct OutOfBlocks {
    pub total: usize,
}

/// A broken structural invariant found by the sanity checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanityViolation {
    #[error("block {block}: cursors out of order (scan {scan}, free {free}, capacity {capacity})")]
    CursorOrder {
        block: usize,
        scan: usize,
        free: usize,
        capacity: usize,
    },
    #[error("{list} list records {recorded} blocks but links {counted}")]
    CountMismatch {
        list: &'static str,
        recorded: usize,
        counted: usize,
    },
    #[error("block {block} belongs to step {found}, expected step {expected}")]
    WrongStep {
        block: usize,
        expected: usize,
        found: usize,
    },
    #[error("block {block} on the {list} list still has {pending} unscanned words")]
    Unscanned {
        block: usize,
        list: &'static str,
        pending: usize,
    },
    #[error("workspace limit {limit} outside [{free}, {capacity}]")]
    LimitOutOfRange {
        free: usize,
        limit: usize,
        capacity: usize,
    },
    #[error("block {block} is owned {count} times")]
    Duplicate { block: usize, count: usize },
    #[error("{missing} blocks are not owned by anything")]
    Missing { missing: usize },
}
