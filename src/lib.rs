//! File-operation core for a dual-pane file manager.
//!
//! The crate models filesystem entries as [`FsObject`] values with cached
//! metadata and per-object operations, and runs bulk copy/move batches
//! through an [`OperationPerformer`]: a background worker with streaming
//! chunked I/O, throughput and ETA reporting, pause and cancellation, and
//! an interactive halt protocol driven through an [`OperationObserver`].

pub mod copier;
pub mod errors;
pub mod format;
pub mod hash;
pub mod object;
pub mod observer;
pub mod paths;
pub mod performer;
pub mod volume;

pub use copier::{ChunkStatus, ChunkedCopier};
pub use errors::{FsOpError, FsOpResult};
pub use object::{FsObject, FsObjectProperties, FsObjectType};
pub use observer::{HaltReason, IconSource, OperationObserver, Progress, UserResponse};
pub use performer::{
    Operation, OperationControl, OperationPerformer, PerformerOptions, PerformerState,
};
