//! Observer/controller contract between an operation performer and a
//! progress UI. All callbacks run on the performer's worker thread.

use serde::{Deserialize, Serialize};

use crate::object::FsObject;

/// Why the performer suspended execution and is asking for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Destination path is occupied: file over file, or a directory over
    /// anything.
    TargetAlreadyExists,
    /// The OS refused access to the source or destination.
    AccessDenied,
    /// Any other OS failure; the raw message is attached.
    Fail,
    /// The source disappeared between discovery and the operation.
    SourceVanished,
    /// The destination exists and carries the read-only attribute.
    DestinationReadOnly,
}

/// The decision returned by the observer for a halt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserResponse {
    Skip,
    SkipAll,
    Overwrite,
    OverwriteAll,
    /// Retry the item under the given destination name.
    Rename(String),
    Retry,
    Cancel,
    /// Acknowledge the error and continue with the rest of the batch.
    Proceed,
}

impl UserResponse {
    /// Whether this decision also applies to every later halt with the
    /// same reason.
    pub fn is_global(&self) -> bool {
        matches!(self, Self::SkipAll | Self::OverwriteAll)
    }

    /// The per-item equivalent of a batch-wide decision.
    pub fn to_single(&self) -> Self {
        match self {
            Self::SkipAll => Self::Skip,
            Self::OverwriteAll => Self::Overwrite,
            other => other.clone(),
        }
    }
}

/// Progress snapshot delivered after chunks and item completions.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Whole-batch completion, 0.0 to 100.0.
    pub total_percent: f32,
    pub files_done: usize,
    pub files_total: usize,
    /// Completion of the file currently under work, 0.0 to 100.0.
    pub file_percent: f32,
    pub bytes_per_sec: u64,
    /// 0 when the throughput estimate is not yet meaningful.
    pub seconds_remaining: u32,
}

/// Callback sink a performer drives. Calls arrive in a fixed order: a
/// current-file change precedes any progress attributable to that file,
/// halts never interleave with progress, and the finished notification is
/// final.
///
/// `on_process_halted` is synchronous: the worker blocks until it
/// returns. The observer must not touch the performer's control (pause,
/// cancel) from inside that call; its return value is the only channel
/// for resolving the halt.
pub trait OperationObserver: Send {
    fn on_progress_changed(&mut self, progress: Progress);

    /// Asked at most once per failed attempt. `dest` is absent for
    /// failures with no destination involved, such as deleting a source.
    fn on_process_halted(
        &mut self,
        reason: HaltReason,
        source: &FsObject,
        dest: Option<&FsObject>,
        error_message: &str,
    ) -> UserResponse;

    fn on_current_file_changed(&mut self, path: &str);

    /// Delivered exactly once, after every other notification.
    fn on_process_finished(&mut self, summary: &str);
}

/// Injected provider of display icons for filesystem objects. The core
/// never resolves icons itself and holds no process-wide provider state;
/// a view passes its own source where it needs one.
pub trait IconSource {
    type Icon;

    fn icon_for(&self, object: &FsObject) -> Self::Icon;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_sources_are_plain_values() {
        struct ByType;
        impl IconSource for ByType {
            type Icon = &'static str;

            fn icon_for(&self, object: &FsObject) -> Self::Icon {
                if object.is_dir() {
                    "folder"
                } else {
                    "file"
                }
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        let object = FsObject::new(dir.path());
        assert_eq!(ByType.icon_for(&object), "folder");
    }

    #[test]
    fn global_responses_map_to_their_single_form() {
        assert!(UserResponse::SkipAll.is_global());
        assert!(UserResponse::OverwriteAll.is_global());
        assert!(!UserResponse::Retry.is_global());

        assert_eq!(UserResponse::SkipAll.to_single(), UserResponse::Skip);
        assert_eq!(
            UserResponse::OverwriteAll.to_single(),
            UserResponse::Overwrite
        );
        assert_eq!(
            UserResponse::Rename("b.txt".into()).to_single(),
            UserResponse::Rename("b.txt".into())
        );
    }
}
