//! File transfer between local and remote endpoints
//!
//! # Module Structure
//!
//! - `fs` - [`TransferFs`] trait and [`Endpoint`]
//! - `local` / `remote` - local disk and SFTP implementations
//! - `engine` - single-file and concurrent directory copies
//! - `progress` - shared progress tracking
//! - `forward` - remote-to-remote relay

mod engine;
mod error;
mod forward;
mod fs;
mod local;
mod progress;
mod remote;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::{
    ErrorMode, TransferConfig, TransferEngine, TransferFailure, TransferReport, TransferTask,
    DEFAULT_MAX_CONCURRENT,
};
pub use error::TransferError;
pub use forward::RemoteRelay;
pub use fs::{BoxedReader, BoxedWriter, Endpoint, EndpointKind, FileStat, TransferFs, WalkEntry};
pub use local::LocalFs;
pub use progress::{ProgressState, ProgressTracker, ProgressWriter};
pub use remote::RemoteFs;
