//! Structural checks over workspaces and block ownership.
//!
//! All of this walks lists, so it is only run when a cycle asks for it or
//! from tests and the driver.

use std::fmt;

use crate::{BlockList, BlockRef, BlockSpace, RetiredBlocks, SanityViolation, Workspace};

impl crate::Block {
    /// Checks `scan <= free <= capacity`.
    pub fn check_cursors(&self, index: usize) -> Result<(), SanityViolation> {
        let (scan, free) = (self.scan(), self.free());
        if scan <= free && free <= self.capacity() {
            return Ok(());
        }
        Err(SanityViolation::CursorOrder {
            block: index,
            scan,
            free,
            capacity: self.capacity(),
        })
    }
}

impl Workspace<'_> {
    /// Walks every list of the workspace and checks its blocks.
    ///
    /// Part and scavenged blocks must be fully scanned, every block must
    /// belong to the workspace's step and the recorded list lengths must
    /// match the chains.
    pub fn check_sanity(&self) -> Result<(), SanityViolation> {
        let settings = self.cycle().settings();
        let space = self.cycle().space();
        let expected = self.step();

        if let Some(todo) = self.todo_block() {
            let block = space.block(todo);
            block.check_cursors(todo.index())?;
            if block.free() > self.todo_free()
                || self.todo_free() > self.todo_limit()
                || self.todo_limit() > block.capacity()
            {
                return Err(SanityViolation::LimitOutOfRange {
                    free: self.todo_free(),
                    limit: self.todo_limit(),
                    capacity: block.capacity(),
                });
            }
        }

        for (name, list) in self.lists() {
            let mut counted = 0;
            for (idx, block) in list.iter(space) {
                counted += 1;
                block.check_cursors(idx)?;
                let found = settings.step_index(block.step_id());
                if found != expected {
                    return Err(SanityViolation::WrongStep {
                        block: idx,
                        expected,
                        found,
                    });
                }
                if name != "overflow" && !block.is_fully_scanned() {
                    return Err(SanityViolation::Unscanned {
                        block: idx,
                        list: name,
                        pending: block.unscanned(),
                    });
                }
            }
            if counted != list.len() {
                return Err(SanityViolation::CountMismatch {
                    list: name,
                    recorded: list.len(),
                    counted,
                });
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> WorkspaceSummary {
        WorkspaceSummary {
            worker: self.worker(),
            step: self.step_id(),
            current: self.current_block(),
            todo_free: self.todo_free(),
            todo_limit: self.todo_limit(),
            queued: self.queued(),
            overflow: self.overflow_list().len(),
            part: self.part_list().len(),
            scavenged: self.scavenged_list().len(),
            copied: self.copied_words(),
        }
    }
}

/// Snapshot of a workspace for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSummary {
    pub worker: usize,
    pub step: crate::StepId,
    pub current: Option<usize>,
    pub todo_free: usize,
    pub todo_limit: usize,
    pub queued: usize,
    pub overflow: usize,
    pub part: usize,
    pub scavenged: usize,
    pub copied: usize,
}

impl fmt::Display for WorkspaceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {} step {}: ", self.worker, self.step)?;
        match self.current {
            Some(block) => write!(
                f,
                "todo block {block} [{}/{}]",
                self.todo_free, self.todo_limit
            )?,
            None => f.write_str("no todo block")?,
        }
        write!(
            f,
            ", queued {}, overflow {}, part {}, scavenged {}, copied {} words",
            self.queued, self.overflow, self.part, self.scavenged, self.copied
        )
    }
}

/// Counts how often every block of a space is owned.
///
/// Feed it everything that can hold a block, then [`Census::finish`] checks
/// that each block was seen exactly once.
#[derive(Debug)]
pub struct Census<'s> {
    space: &'s BlockSpace,
    owners: Vec<usize>,
}

impl<'s> Census<'s> {
    pub fn new(space: &'s BlockSpace) -> Self {
        Self {
            space,
            owners: vec![0; space.len()],
        }
    }

    pub fn record(&mut self, block: &BlockRef) {
        self.owners[block.index()] += 1;
    }

    pub fn record_list(&mut self, list: &BlockList) {
        for (idx, _) in list.iter(self.space) {
            self.owners[idx] += 1;
        }
    }

    pub fn record_retired(&mut self, retired: &RetiredBlocks) {
        if let Some(block) = &retired.current {
            self.record(block);
        }
        self.record_list(&retired.part);
        self.record_list(&retired.scavenged);
        self.record_list(&retired.overflow);
    }

    /// Blocks seen so far, duplicates counted once.
    pub fn owned(&self) -> usize {
        self.owners.iter().filter(|&&count| count > 0).count()
    }

    pub fn finish(self) -> Result<(), SanityViolation> {
        if let Some((block, &count)) =
            self.owners.iter().enumerate().find(|(_, count)| **count > 1)
        {
            return Err(SanityViolation::Duplicate { block, count });
        }
        let missing = self.owners.iter().filter(|&&count| count == 0).count();
        if missing > 0 {
            return Err(SanityViolation::Missing { missing });
        }
        Ok(())
    }
}

/// Checks that `free` together with `retired` owns every block of `space`
/// exactly once.
pub fn membership_census(
    space: &BlockSpace,
    free: &BlockList,
    retired: &[RetiredBlocks],
) -> Result<(), SanityViolation> {
    let mut census = Census::new(space);
    census.record_list(free);
    for blocks in retired {
        census.record_retired(blocks);
    }
    census.finish()
}
