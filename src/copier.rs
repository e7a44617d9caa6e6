//! Per-file streaming copy state, advanced in caller-sized chunks so the
//! owner can interleave progress reporting, pause and cancellation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::errors::{FsOpError, FsOpResult};

/// Progress of a single `copy_chunk` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// A chunk was transferred; more data remains.
    InProgress,
    /// The source hit end of file; both handles are released.
    Completed,
}

#[derive(Debug, Default)]
enum CopyState {
    #[default]
    Idle,
    Active {
        src: File,
        dst: File,
        dst_path: PathBuf,
        bytes_copied: u64,
    },
}

/// Streaming copy of one file.
///
/// Either both handles are open or neither is: the `Active` variant owns
/// the pair, so a half-open copy is unrepresentable. Dropping an active
/// copier closes both handles and deletes the partial destination.
#[derive(Debug, Default)]
pub struct ChunkedCopier {
    state: CopyState,
    last_error_kind: Option<io::ErrorKind>,
}

impl ChunkedCopier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers the next chunk of up to `chunk_size` bytes. The first call
    /// opens both files; end of file releases them and reports completion.
    /// Any read or write failure releases both handles and leaves whatever
    /// was already written at the destination for the caller to dispose of.
    pub fn copy_chunk(
        &mut self,
        chunk_size: usize,
        source_path: &Path,
        dest_path: &Path,
    ) -> FsOpResult<ChunkStatus> {
        if matches!(self.state, CopyState::Idle) {
            let src = match File::open(source_path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    self.last_error_kind = Some(err.kind());
                    return Err(FsOpError::ObjectDoesNotExist(
                        source_path.display().to_string(),
                    ));
                }
                Err(err) => {
                    self.last_error_kind = Some(err.kind());
                    return Err(FsOpError::os(&err));
                }
            };
            let dst = match OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(dest_path)
            {
                Ok(file) => file,
                Err(err) => {
                    self.last_error_kind = Some(err.kind());
                    return Err(FsOpError::os(&err));
                }
            };
            self.state = CopyState::Active {
                src,
                dst,
                dst_path: dest_path.to_path_buf(),
                bytes_copied: 0,
            };
        }

        let CopyState::Active {
            src,
            dst,
            bytes_copied,
            ..
        } = &mut self.state
        else {
            unreachable!("state was just made active");
        };

        let mut buffer = vec![0u8; chunk_size.max(1)];
        let bytes_read = match src.read(&mut buffer) {
            Ok(n) => n,
            Err(err) => {
                self.last_error_kind = Some(err.kind());
                self.release();
                return Err(FsOpError::os(&err));
            }
        };

        if bytes_read == 0 {
            self.release();
            return Ok(ChunkStatus::Completed);
        }

        match dst.write_all(&buffer[..bytes_read]) {
            Ok(()) => {
                *bytes_copied += bytes_read as u64;
                Ok(ChunkStatus::InProgress)
            }
            Err(err) => {
                self.last_error_kind = Some(err.kind());
                self.release();
                Err(FsOpError::os(&err))
            }
        }
    }

    /// Kind of the I/O error behind the most recent failure, if any.
    pub(crate) fn last_error_kind(&self) -> Option<io::ErrorKind> {
        self.last_error_kind
    }

    /// True iff both handles are held open.
    pub fn in_progress(&self) -> bool {
        matches!(self.state, CopyState::Active { .. })
    }

    /// Current source read position, 0 when no copy is in progress.
    pub fn bytes_copied(&self) -> u64 {
        match &self.state {
            CopyState::Active { bytes_copied, .. } => *bytes_copied,
            CopyState::Idle => 0,
        }
    }

    /// Destination of the in-progress copy, if any.
    pub fn destination(&self) -> Option<&Path> {
        match &self.state {
            CopyState::Active { dst_path, .. } => Some(dst_path),
            CopyState::Idle => None,
        }
    }

    /// Closes both handles and deletes the partial destination. Succeeds
    /// iff the destination is gone afterwards; a no-op when idle.
    pub fn cancel_copy(&mut self) -> FsOpResult<()> {
        match self.release() {
            CopyState::Idle => Ok(()),
            CopyState::Active {
                src, dst, dst_path, ..
            } => {
                drop(src);
                drop(dst);
                fs::remove_file(&dst_path).map_err(|err| FsOpError::os(&err))
            }
        }
    }

    fn release(&mut self) -> CopyState {
        std::mem::take(&mut self.state)
    }
}

impl Drop for ChunkedCopier {
    fn drop(&mut self) {
        if let CopyState::Active {
            src, dst, dst_path, ..
        } = self.release()
        {
            drop(src);
            drop(dst);
            if let Err(err) = fs::remove_file(&dst_path) {
                log::warn!(
                    "failed to remove partial destination {}: {}",
                    dst_path.display(),
                    err
                );
            }
        }
    }
}

/// Carries the source's permission bits and modification time over to a
/// freshly copied destination.
pub fn preserve_file_metadata(source: &Path, dest: &Path) -> io::Result<()> {
    let metadata = fs::metadata(source)?;
    fs::set_permissions(dest, metadata.permissions())?;
    filetime::set_file_mtime(
        dest,
        filetime::FileTime::from_system_time(metadata.modified()?),
    )?;
    Ok(())
}
