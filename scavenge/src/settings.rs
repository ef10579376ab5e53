use crate::{BLOCK_WORDS, SettingsError, StepId, WORD_SIZE};

/// Default scavenging granularity in words.
pub const WORK_UNIT_WORDS: usize = 128;
/// Default bound of a todo queue.
pub const TODO_QUEUE_CAPACITY: usize = 128;

/// Configuration of one collection cycle and of the block space it uses.
#[derive(Debug, Clone)]
pub struct ScavengeSettings {
    /// Words per block. Blocks are larger than any single reservation.
    pub block_words: usize,
    /// Number of blocks in the block space.
    pub block_count: usize,
    /// Unit of scavenging work in words.
    ///
    /// Decides both when a todo block may grow its limit in place and whether
    /// a scanned block is worth keeping on the part list.
    pub work_unit_words: usize,
    /// Blocks a todo queue holds before publishing spills to the overflow list.
    pub queue_capacity: usize,
    /// Collector threads taking part in the cycle.
    pub workers: usize,
    pub generations: usize,
    pub steps_per_generation: usize,
    /// Walk block lists after every change to verify their counters.
    /// Only takes effect in debug builds.
    pub sanity_checks: bool,
}

impl Default for ScavengeSettings {
    fn default() -> Self {
        Self {
            block_words: BLOCK_WORDS,
            block_count: 1024, // 32 MB with 64 bit words
            work_unit_words: WORK_UNIT_WORDS,
            queue_capacity: TODO_QUEUE_CAPACITY,
            workers: 1,
            generations: 2,
            steps_per_generation: 1,
            sanity_checks: false,
        }
    }
}

impl ScavengeSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        let non_zero = [
            ("block_words", self.block_words),
            ("block_count", self.block_count),
            ("work_unit_words", self.work_unit_words),
            ("queue_capacity", self.queue_capacity),
            ("workers", self.workers),
            ("generations", self.generations),
            ("steps_per_generation", self.steps_per_generation),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, val)| *val == 0) {
            return Err(SettingsError::Zero(name));
        }
        if self.work_unit_words >= self.block_words {
            return Err(SettingsError::WorkUnitTooLarge {
                work_unit: self.work_unit_words,
                block_words: self.block_words,
            });
        }
        if self.space_bytes().is_none() {
            return Err(SettingsError::SpaceTooLarge {
                blocks: self.block_count,
                block_words: self.block_words,
            });
        }
        if self.step_count() > u16::MAX as usize {
            return Err(SettingsError::TooManySteps(self.step_count()));
        }
        Ok(())
    }

    /// Bytes needed to back every block, `None` on overflow.
    pub fn space_bytes(&self) -> Option<usize> {
        self.block_words
            .checked_mul(WORD_SIZE)?
            .checked_mul(self.block_count)
    }

    #[inline]
    pub fn step_count(&self) -> usize {
        self.generations.saturating_mul(self.steps_per_generation)
    }

    /// Generation and step number of an absolute step index.
    #[inline]
    pub fn step_id(&self, step: usize) -> StepId {
        debug_assert!(step < self.step_count());
        StepId {
            generation: (step / self.steps_per_generation) as u16,
            number: (step % self.steps_per_generation) as u16,
        }
    }

    /// Absolute step index of `id`.
    #[inline]
    pub fn step_index(&self, id: StepId) -> usize {
        id.generation as usize * self.steps_per_generation + id.number as usize
    }

    /// Whether list walking checks run after each list change.
    #[inline]
    pub fn checks_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.sanity_checks
    }
}
