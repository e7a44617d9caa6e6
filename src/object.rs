//! Filesystem object value type: an absolute path plus a cached metadata
//! snapshot, queries over it, and the per-object operations (atomic and
//! chunked).

use std::cell::Cell;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::copier::{ChunkStatus, ChunkedCopier};
use crate::errors::{FsOpError, FsOpResult};
use crate::format;
use crate::hash::hash_path;
use crate::paths;
use crate::volume;

/// What kind of filesystem entry a path points at. `Other` covers
/// symlinks, devices and sockets; only a narrow subset of operations is
/// defined on those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FsObjectType {
    File,
    Directory,
    Other,
    Nonexistent,
}

/// Cached metadata snapshot, rebuilt by `refresh()`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsObjectProperties {
    /// Absolute, forward-slash-normalized path.
    pub full_path: String,
    /// Containing directory; a filesystem root is its own parent.
    pub parent_dir: String,
    /// File name with extension, or the directory's last segment.
    pub full_name: String,
    /// Name without the final extension; equals `full_name` for
    /// directories.
    pub base_name: String,
    /// Substring after the final dot of a file name, empty if none.
    pub extension: String,
    pub exists: bool,
    pub object_type: FsObjectType,
    /// Bytes; 0 for directories unless a tally was attached.
    pub size: u64,
    /// `None` until the object has been refreshed against an existing
    /// entry, or when the filesystem cannot report it.
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Identity hash of `full_path`; fixed at construction.
    pub hash: u64,
}

/// A filesystem object. Equality and hashing are by path identity, so two
/// objects naming the same path compare equal regardless of whether the
/// entry exists.
#[derive(Debug)]
pub struct FsObject {
    properties: FsObjectProperties,
    /// The constructing path ended with a separator; a nonexistent path
    /// with this hint is treated as a directory-to-be.
    dir_hint: bool,
    volume_memo: Cell<Option<u64>>,
    copier: ChunkedCopier,
    last_error: String,
    last_error_kind: Option<io::ErrorKind>,
}

impl FsObject {
    /// Builds an object for `path` and performs the initial refresh.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let raw = path.as_ref().to_string_lossy();
        let dir_hint = raw.ends_with('/') || raw.ends_with('\\');
        let full_path = paths::normalize_path(path.as_ref());
        let hash = hash_path(&full_path);

        let mut object = Self {
            properties: FsObjectProperties {
                parent_dir: paths::parent_of(&full_path),
                full_name: String::new(),
                base_name: String::new(),
                extension: String::new(),
                exists: false,
                object_type: FsObjectType::Nonexistent,
                size: 0,
                created_at: None,
                modified_at: None,
                hash,
                full_path,
            },
            dir_hint,
            volume_memo: Cell::new(None),
            copier: ChunkedCopier::new(),
            last_error: String::new(),
            last_error_kind: None,
        };
        object.refresh();
        object
    }

    /// Builds an object from an already-gathered snapshot, without touching
    /// the filesystem. The identity hash is recomputed from the path.
    pub fn from_properties(mut properties: FsObjectProperties) -> Self {
        properties.full_path = paths::normalize_path(&properties.full_path);
        properties.parent_dir = paths::parent_of(&properties.full_path);
        properties.hash = hash_path(&properties.full_path);
        let dir_hint = properties.object_type == FsObjectType::Directory;
        Self {
            properties,
            dir_hint,
            volume_memo: Cell::new(None),
            copier: ChunkedCopier::new(),
            last_error: String::new(),
            last_error_kind: None,
        }
    }

    /// Re-stats the path and rebuilds every cached property.
    pub fn refresh(&mut self) {
        match fs::symlink_metadata(self.path()) {
            Ok(metadata) => {
                let file_type = metadata.file_type();
                self.properties.exists = true;
                self.properties.object_type = if file_type.is_symlink() {
                    FsObjectType::Other
                } else if file_type.is_file() {
                    FsObjectType::File
                } else if file_type.is_dir() {
                    FsObjectType::Directory
                } else {
                    FsObjectType::Other
                };
                self.properties.size = if self.properties.object_type == FsObjectType::File {
                    metadata.len()
                } else {
                    0
                };
                self.properties.created_at = metadata
                    .created()
                    .or_else(|_| metadata.modified())
                    .ok()
                    .map(DateTime::<Utc>::from);
                self.properties.modified_at =
                    metadata.modified().ok().map(DateTime::<Utc>::from);
            }
            Err(_) => {
                self.properties.exists = false;
                self.properties.object_type = if self.dir_hint {
                    FsObjectType::Directory
                } else {
                    FsObjectType::Nonexistent
                };
                self.properties.size = 0;
                self.properties.created_at = None;
                self.properties.modified_at = None;
            }
        }

        let full_name = if paths::is_root_path(&self.properties.full_path) {
            String::new()
        } else {
            match self.properties.full_path.rfind('/') {
                Some(idx) => self.properties.full_path[idx + 1..].to_string(),
                None => self.properties.full_path.clone(),
            }
        };

        if self.properties.object_type == FsObjectType::File {
            let (base, ext) = paths::split_extension(&full_name);
            self.properties.base_name = base.to_string();
            self.properties.extension = ext.to_string();
        } else {
            self.properties.base_name = full_name.clone();
            self.properties.extension = String::new();
        }
        self.properties.full_name = full_name;
        self.properties.parent_dir = paths::parent_of(&self.properties.full_path);
    }

    // Queries over the cached snapshot.

    pub fn properties(&self) -> &FsObjectProperties {
        &self.properties
    }

    pub fn full_path(&self) -> &str {
        &self.properties.full_path
    }

    pub fn parent_dir_path(&self) -> &str {
        &self.properties.parent_dir
    }

    pub fn full_name(&self) -> &str {
        &self.properties.full_name
    }

    /// File name without the final extension, or the directory name.
    pub fn name(&self) -> &str {
        &self.properties.base_name
    }

    pub fn extension(&self) -> &str {
        &self.properties.extension
    }

    pub fn exists(&self) -> bool {
        self.properties.exists
    }

    /// Whether the object has ever been refreshed against a live entry.
    pub fn is_valid(&self) -> bool {
        self.properties.created_at.is_some()
    }

    pub fn object_type(&self) -> FsObjectType {
        self.properties.object_type
    }

    pub fn is_file(&self) -> bool {
        self.properties.object_type == FsObjectType::File
    }

    pub fn is_dir(&self) -> bool {
        self.properties.object_type == FsObjectType::Directory
    }

    pub fn size(&self) -> u64 {
        self.properties.size
    }

    pub fn hash(&self) -> u64 {
        self.properties.hash
    }

    /// Listing excluding `.` and `..` is empty. Hidden and system entries
    /// count as content; an unreadable directory is not reported empty.
    pub fn is_empty_dir(&self) -> bool {
        if !self.is_dir() {
            return false;
        }
        match fs::read_dir(self.path()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        }
    }

    /// The `..` navigation entry. It cannot be moved or deleted.
    pub fn is_cdup(&self) -> bool {
        self.properties.full_name == ".."
    }

    #[cfg(unix)]
    pub fn is_executable(&self) -> bool {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(self.path())
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    pub fn is_executable(&self) -> bool {
        matches!(
            self.properties.extension.to_ascii_lowercase().as_str(),
            "exe" | "bat" | "cmd" | "com"
        )
    }

    #[cfg(unix)]
    pub fn is_readable(&self) -> bool {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(self.path())
            .map(|m| m.permissions().mode() & 0o444 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    pub fn is_readable(&self) -> bool {
        self.exists_on_disk()
    }

    /// False for nonexistent objects.
    pub fn is_writable(&self) -> bool {
        fs::metadata(self.path())
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    pub fn is_hidden(&self) -> bool {
        self.properties.full_name.starts_with('.')
    }

    #[cfg(windows)]
    pub fn is_hidden(&self) -> bool {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        fs::metadata(self.path())
            .map(|m| m.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    pub fn is_hidden(&self) -> bool {
        false
    }

    /// Direct or indirect containment: a case-insensitive prefix match on
    /// the full paths.
    pub fn is_child_of(&self, parent: &FsObject) -> bool {
        paths::is_path_prefix(&parent.properties.full_path, &self.properties.full_path)
    }

    /// The chain from this object's path up to its filesystem root.
    pub fn path_hierarchy(&self) -> Vec<String> {
        paths::path_hierarchy(&self.properties.full_path)
    }

    /// Human-readable size; files only, empty otherwise.
    pub fn size_string(&self) -> String {
        if self.is_file() {
            format::file_size_to_string(self.properties.size)
        } else {
            String::new()
        }
    }

    /// Local-time `dd.MM.yyyy HH:mm`, empty until refreshed.
    pub fn modification_date_string(&self) -> String {
        self.properties
            .modified_at
            .map(format::modification_date_string)
            .unwrap_or_default()
    }

    /// Attaches an externally computed cumulative size to a directory.
    pub fn set_dir_size(&mut self, size: u64) {
        debug_assert!(self.is_dir(), "directory size tally on a non-directory");
        self.properties.size = size;
    }

    /// Identifier of the volume this path lives on. Memoized on success;
    /// a failed query is retried on the next call.
    pub fn volume_id(&self) -> Option<u64> {
        if let Some(id) = self.volume_memo.get() {
            return Some(id);
        }
        let id = volume::volume_id(self.path());
        if id.is_some() {
            self.volume_memo.set(id);
        }
        id
    }

    /// True iff both volumes are known and equal, i.e. a rename into
    /// `dest`'s directory can succeed.
    pub fn is_movable_to(&self, dest: &FsObject) -> bool {
        volume::same_volume(self.volume_id(), dest.volume_id())
    }

    /// OS error text from the most recent failed operation.
    pub fn last_error_message(&self) -> &str {
        &self.last_error
    }

    pub(crate) fn last_error_kind(&self) -> Option<io::ErrorKind> {
        self.last_error_kind
    }

    // Operations.

    /// Clears or sets the read-only attribute; files only. On Windows the
    /// attribute call goes through the `\\?\` long-path prefix.
    pub fn make_writable(&mut self, writable: bool) -> bool {
        debug_assert!(self.is_file(), "only files carry the read-only toggle");
        if !self.is_file() {
            return false;
        }
        match self.set_readonly_attribute(!writable) {
            Ok(()) => true,
            Err(err) => {
                self.record_os_error(&err);
                false
            }
        }
    }

    #[cfg(unix)]
    fn set_readonly_attribute(&self, readonly: bool) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(self.path())?;
        let mut mode = metadata.permissions().mode();
        if readonly {
            mode &= !0o200;
        } else {
            mode |= 0o200;
        }
        fs::set_permissions(self.path(), fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_readonly_attribute(&self, readonly: bool) -> io::Result<()> {
        let native = paths::to_native_separators(&self.properties.full_path);
        let long_path = format!(r"\\?\{native}");
        let metadata = fs::metadata(&long_path)?;
        let mut permissions = metadata.permissions();
        permissions.set_readonly(readonly);
        fs::set_permissions(&long_path, permissions)
    }

    /// Unlinks a file or removes an empty directory.
    pub fn remove(&mut self) -> FsOpResult<()> {
        log::debug!("removing {}", self.properties.full_path);
        if !self.exists_on_disk() {
            return Err(FsOpError::ObjectDoesNotExist(
                self.properties.full_path.clone(),
            ));
        }

        if self.is_file() {
            match fs::remove_file(self.path()) {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.record_os_error(&err);
                    Err(FsOpError::os(&err))
                }
            }
        } else if self.is_dir() {
            debug_assert!(self.is_readable(), "removing an unreadable directory");
            debug_assert!(self.is_empty_dir(), "removing a non-empty directory");
            match fs::remove_dir(self.path()) {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.record_os_error(&err);
                    Err(FsOpError::os(&err))
                }
            }
        } else {
            Err(FsOpError::Fail(format!(
                "cannot remove {}: unsupported object type",
                self.properties.full_path
            )))
        }
    }

    /// Whole-file copy in a single OS call; files only. Succeeds or fails
    /// as the OS copy does, with the OS error retained.
    pub fn copy_atomically(
        &mut self,
        dest_dir: &Path,
        new_name: Option<&str>,
    ) -> FsOpResult<()> {
        debug_assert!(self.is_file(), "atomic copy of a non-file");
        debug_assert!(dest_dir.is_dir(), "atomic copy into a non-directory");

        let dest = dest_dir.join(new_name.unwrap_or(&self.properties.full_name));
        match fs::copy(self.path(), &dest) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.record_os_error(&err);
                Err(FsOpError::os(&err))
            }
        }
    }

    /// Rename into `dest_dir`, keeping the name unless `new_name` is given.
    /// A rename across volumes surfaces as `CrossVolume` so the caller can
    /// fall back to copy + delete.
    pub fn move_atomically(
        &mut self,
        dest_dir: &Path,
        new_name: Option<&str>,
    ) -> FsOpResult<()> {
        if !self.exists_on_disk() {
            return Err(FsOpError::ObjectDoesNotExist(
                self.properties.full_path.clone(),
            ));
        }
        if self.is_cdup() {
            return Err(FsOpError::Fail(
                "the parent-directory entry cannot be moved".into(),
            ));
        }
        if !self.is_file() && !self.is_dir() {
            return Err(FsOpError::Fail(format!(
                "cannot move {}: unsupported object type",
                self.properties.full_path
            )));
        }
        debug_assert!(dest_dir.is_dir(), "move into a non-directory");

        let dest = dest_dir.join(new_name.unwrap_or(&self.properties.full_name));
        if let Ok(dest_meta) = fs::symlink_metadata(&dest) {
            if self.is_dir() || dest_meta.is_file() {
                return Err(FsOpError::TargetAlreadyExists(dest.display().to_string()));
            }
        }

        #[cfg(test)]
        if test_support::rename_crosses_volume(&self.properties.full_path) {
            return Err(FsOpError::CrossVolume);
        }

        match fs::rename(self.path(), &dest) {
            Ok(()) => {
                if self.is_file() {
                    // The old path no longer exists; the snapshot reflects
                    // that. A moved directory's object is stale and must be
                    // discarded by the caller.
                    self.refresh();
                }
                Ok(())
            }
            Err(err) if volume::is_cross_volume_error(&err) => Err(FsOpError::CrossVolume),
            Err(err) => {
                self.record_os_error(&err);
                Err(FsOpError::os(&err))
            }
        }
    }

    // Non-blocking chunked copy, backed by the attached copier.

    /// Transfers the next chunk of up to `chunk_size` bytes towards
    /// `dest_dir`. The first call opens both files; completion or any
    /// failure releases them.
    pub fn copy_chunk(
        &mut self,
        chunk_size: usize,
        dest_dir: &Path,
        new_name: Option<&str>,
    ) -> FsOpResult<ChunkStatus> {
        debug_assert!(self.is_file(), "chunked copy of a non-file");
        let dest = dest_dir.join(new_name.unwrap_or(&self.properties.full_name));
        let source = PathBuf::from(&self.properties.full_path);

        match self.copier.copy_chunk(chunk_size, &source, &dest) {
            Ok(status) => Ok(status),
            Err(err) => {
                self.last_error_kind = self.copier.last_error_kind();
                self.record_op_error(&err);
                Err(err)
            }
        }
    }

    /// Moves ignore the chunk size and fall back to the atomic rename.
    pub fn move_chunk(
        &mut self,
        _chunk_size: usize,
        dest_dir: &Path,
        new_name: Option<&str>,
    ) -> FsOpResult<()> {
        self.move_atomically(dest_dir, new_name)
    }

    pub fn copy_operation_in_progress(&self) -> bool {
        self.copier.in_progress()
    }

    /// Source read position of the in-progress copy, else 0.
    pub fn bytes_copied(&self) -> u64 {
        self.copier.bytes_copied()
    }

    /// Aborts an in-progress copy and deletes the partial destination.
    pub fn cancel_copy(&mut self) -> FsOpResult<()> {
        match self.copier.cancel_copy() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.record_op_error(&err);
                Err(err)
            }
        }
    }

    fn path(&self) -> &Path {
        Path::new(&self.properties.full_path)
    }

    fn exists_on_disk(&self) -> bool {
        fs::symlink_metadata(self.path()).is_ok()
    }

    fn record_os_error(&mut self, err: &io::Error) {
        self.last_error = err.to_string();
        self.last_error_kind = Some(err.kind());
    }

    fn record_op_error(&mut self, err: &FsOpError) {
        if let FsOpError::Fail(message) = err {
            self.last_error = message.clone();
        }
    }
}


impl PartialEq for FsObject {
    fn eq(&self, other: &Self) -> bool {
        self.properties.hash == other.properties.hash
    }
}

impl Eq for FsObject {}

impl Hash for FsObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.properties.hash);
    }
}

impl Clone for FsObject {
    /// Clones the snapshot and volume memo. An in-progress copy is never
    /// inherited; the clone starts idle.
    fn clone(&self) -> Self {
        Self {
            properties: self.properties.clone(),
            dir_hint: self.dir_hint,
            volume_memo: Cell::new(self.volume_memo.get()),
            copier: ChunkedCopier::new(),
            last_error: self.last_error.clone(),
            last_error_kind: self.last_error_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn snapshot_of_a_regular_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("report.tar.gz");
        fs::write(&file, b"0123456789").unwrap();

        let object = FsObject::new(&file);
        assert!(object.exists());
        assert!(object.is_file());
        assert!(object.is_valid());
        assert_eq!(object.size(), 10);
        assert_eq!(object.full_name(), "report.tar.gz");
        assert_eq!(object.name(), "report.tar");
        assert_eq!(object.extension(), "gz");
        assert_eq!(object.parent_dir_path(), paths::normalize_path(dir.path()));
        assert_eq!(object.size_string(), "10 B");
        assert!(!object.modification_date_string().is_empty());
    }

    #[test]
    fn identity_is_path_hash_independent_of_existence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ghost.txt");

        let before = FsObject::new(&path);
        assert!(!before.exists());
        assert_eq!(before.object_type(), FsObjectType::Nonexistent);
        assert!(!before.is_valid());

        fs::write(&path, b"now it exists").unwrap();
        let after = FsObject::new(&path);
        assert!(after.exists());

        assert_eq!(before.hash(), after.hash());
        assert_eq!(before, after);
        assert_eq!(
            before.hash(),
            crate::hash::hash_path(&paths::normalize_path(&path))
        );
    }

    #[test]
    fn trailing_slash_infers_a_directory_to_be() {
        let dir = TempDir::new().unwrap();
        let planned = format!("{}/new_subdir/", dir.path().display());
        let object = FsObject::new(&planned);
        assert!(!object.exists());
        assert_eq!(object.object_type(), FsObjectType::Directory);
    }

    #[test]
    fn cdup_entry_is_recognized_and_immovable() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        // ".." is swallowed by normalization for real paths, so construct
        // the snapshot directly the way a panel view would.
        let mut properties = FsObject::new(&sub).properties().clone();
        properties.full_name = "..".to_string();
        let mut cdup = FsObject::from_properties(properties);
        assert!(cdup.is_cdup());
        assert!(matches!(
            cdup.move_atomically(dir.path(), None),
            Err(FsOpError::Fail(_))
        ));
    }

    #[test]
    fn empty_dir_detection_counts_hidden_entries() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let object = FsObject::new(&sub);
        assert!(object.is_empty_dir());

        fs::write(sub.join(".hidden"), b"x").unwrap();
        assert!(!object.is_empty_dir());
    }

    #[test]
    fn dir_size_tally_overrides_cached_zero() {
        let dir = TempDir::new().unwrap();
        let mut object = FsObject::new(dir.path());
        assert!(object.is_dir());
        assert_eq!(object.size(), 0);

        object.set_dir_size(4096);
        assert_eq!(object.size(), 4096);
        assert_eq!(object.size_string(), "");

        object.refresh();
        assert_eq!(object.size(), 0);
    }

    #[test]
    fn child_relationship_is_a_prefix_match() {
        let parent = FsObject::new("/tmp");
        let child = FsObject::new("/tmp/inner/file");
        assert!(child.is_child_of(&parent));
        assert!(!parent.is_child_of(&child));

        // The match is a literal prefix test on the full paths.
        let sibling = FsObject::new("/tmpfoo");
        assert!(sibling.is_child_of(&parent));
        assert!(!parent.is_child_of(&sibling));
    }

    #[test]
    fn remove_semantics_per_object_type() {
        let dir = TempDir::new().unwrap();

        let mut missing = FsObject::new(dir.path().join("missing"));
        assert!(matches!(
            missing.remove(),
            Err(FsOpError::ObjectDoesNotExist(_))
        ));

        let file = dir.path().join("doomed.txt");
        fs::write(&file, b"bye").unwrap();
        let mut object = FsObject::new(&file);
        object.remove().unwrap();
        assert!(!file.exists());

        let sub = dir.path().join("empty");
        fs::create_dir(&sub).unwrap();
        let mut object = FsObject::new(&sub);
        object.remove().unwrap();
        assert!(!sub.exists());
    }

    #[test]
    fn atomic_move_within_a_directory_tree() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"helloworld").unwrap();

        let mut object = FsObject::new(&file);
        object.move_atomically(&sub, None).unwrap();

        assert!(!file.exists());
        assert_eq!(fs::read(sub.join("a.txt")).unwrap(), b"helloworld");
        // The snapshot now reflects the vacated source path.
        assert!(!object.exists());
    }

    #[test]
    fn move_onto_an_existing_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("a.txt"), b"source").unwrap();
        fs::write(sub.join("a.txt"), b"occupied").unwrap();

        let mut object = FsObject::new(dir.path().join("a.txt"));
        assert!(matches!(
            object.move_atomically(&sub, None),
            Err(FsOpError::TargetAlreadyExists(_))
        ));
        assert_eq!(fs::read(sub.join("a.txt")).unwrap(), b"occupied");
    }

    #[test]
    fn rename_across_volumes_is_reported_distinctly() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let file = dir.path().join("x.txt");
        fs::write(&file, b"x").unwrap();

        test_support::add_cross_volume_prefix(dir.path().to_path_buf());
        let mut object = FsObject::new(&file);
        let result = object.move_atomically(&sub, None);
        test_support::remove_cross_volume_prefix(dir.path());

        assert!(matches!(result, Err(FsOpError::CrossVolume)));
        assert!(file.exists());
        assert!(!sub.join("x.txt").exists());
    }

    #[test]
    fn move_chunk_is_the_atomic_move() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let file = dir.path().join("m.txt");
        fs::write(&file, b"whole").unwrap();

        let mut object = FsObject::new(&file);
        // The chunk size plays no role for moves.
        object.move_chunk(16, &sub, None).unwrap();
        assert_eq!(fs::read(sub.join("m.txt")).unwrap(), b"whole");
        assert!(!file.exists());
    }

    #[test]
    fn move_with_a_new_name() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("old.txt");
        fs::write(&file, b"content").unwrap();

        let mut object = FsObject::new(&file);
        object.move_atomically(dir.path(), Some("new.txt")).unwrap();
        assert!(dir.path().join("new.txt").exists());
        assert!(!file.exists());
    }

    #[test]
    fn atomic_copy_duplicates_the_file() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"payload").unwrap();

        let mut object = FsObject::new(&file);
        object.copy_atomically(&sub, None).unwrap();
        assert_eq!(fs::read(sub.join("a.txt")).unwrap(), b"payload");
        assert!(file.exists());

        object.copy_atomically(&sub, Some("b.txt")).unwrap();
        assert_eq!(fs::read(sub.join("b.txt")).unwrap(), b"payload");
    }

    #[test]
    fn atomic_copy_failure_retains_the_os_error() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"payload").unwrap();

        let mut object = FsObject::new(&file);
        fs::remove_file(&file).unwrap();

        assert!(matches!(
            object.copy_atomically(&sub, None),
            Err(FsOpError::Fail(_))
        ));
        assert!(!object.last_error_message().is_empty());
    }

    #[test]
    fn chunked_copy_through_the_object() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let file = dir.path().join("stream.bin");
        let payload = vec![0xabu8; 10_000];
        fs::write(&file, &payload).unwrap();

        let mut object = FsObject::new(&file);
        assert!(!object.copy_operation_in_progress());

        let mut done = false;
        while !done {
            match object.copy_chunk(3000, &sub, None).unwrap() {
                ChunkStatus::InProgress => assert!(object.copy_operation_in_progress()),
                ChunkStatus::Completed => done = true,
            }
        }
        assert!(!object.copy_operation_in_progress());
        assert_eq!(object.bytes_copied(), 0);
        assert_eq!(fs::read(sub.join("stream.bin")).unwrap(), payload);
    }

    #[test]
    fn cancelled_chunked_copy_leaves_no_destination() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let file = dir.path().join("big.bin");
        fs::write(&file, vec![1u8; 50_000]).unwrap();

        let mut object = FsObject::new(&file);
        object.copy_chunk(1000, &sub, None).unwrap();
        assert!(sub.join("big.bin").exists());

        object.cancel_copy().unwrap();
        assert!(!sub.join("big.bin").exists());
        assert!(!object.copy_operation_in_progress());
    }

    #[cfg(unix)]
    #[test]
    fn writable_toggle_flips_the_owner_bit() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("locked.txt");
        fs::write(&file, b"x").unwrap();

        let mut object = FsObject::new(&file);
        assert!(object.is_writable());

        assert!(object.make_writable(false));
        assert!(!object.is_writable());

        assert!(object.make_writable(true));
        assert!(object.is_writable());
    }

    #[test]
    fn volume_memo_agrees_for_siblings() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"1").unwrap();
        fs::write(&b, b"2").unwrap();

        let obj_a = FsObject::new(&a);
        let obj_b = FsObject::new(&b);
        assert!(obj_a.is_movable_to(&obj_b));

        let ghost = FsObject::new(dir.path().join("nope"));
        assert!(!ghost.is_movable_to(&obj_a));
    }
}
