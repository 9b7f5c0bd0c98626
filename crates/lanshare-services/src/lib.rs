//! lanshare-services: chunk storage, partitioning, the content index,
//! transfer logs, and reassembly. No networking lives here.

pub mod index;
pub mod partition;
pub mod reassemble;
pub mod store;
pub mod transfer_log;

pub use index::{ContentIndex, IndexError, IndexSnapshot};
pub use partition::{partition, PartitionError};
pub use reassemble::{part_path, reassemble, ReassembleError};
pub use store::{ChunkStore, MappedChunk, StoreError};
pub use transfer_log::{Direction, TransferLog, TransferLogEntry, TransferLogError};
