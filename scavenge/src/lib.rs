mod block;
mod cycle;
mod error;
mod gate;
mod list;
mod pool;
mod sanity;
mod settings;
mod system;
mod work;
mod workspace;

pub use block::*;
pub use cycle::{Cycle, GcWorker, WorkerQueues, merge_retired};
pub use error::{OutOfBlocks, SanityViolation, SettingsError, SpaceError};
pub use gate::AllocGate;
pub use list::BlockList;
pub use pool::{BlockAllocator, FreePool};
pub use sanity::{Census, WorkspaceSummary, membership_census};
pub use settings::*;
pub use system::{MappedRegion, OS_PAGE_SIZE};
pub use work::{StepWork, TodoQueue, WorkDistribution};
pub use workspace::{RetiredBlocks, Workspace};
