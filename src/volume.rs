//! Volume (device) identity queries. Two paths with the same volume id can
//! be renamed into each other's directories; everything else needs a copy.

use std::io;
use std::path::Path;

/// Stable identifier of the volume a path lives on. `None` when the path
/// cannot be queried, and any comparison involving an unknown id is false.
#[cfg(unix)]
pub fn volume_id(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;

    match std::fs::metadata(path) {
        Ok(metadata) => Some(metadata.dev()),
        Err(err) => {
            log::warn!("failed to query device id for {}: {}", path.display(), err);
            None
        }
    }
}

/// On Windows the id is the drive index 0..25 derived from the letter.
/// UNC and other letterless paths stay unknown.
#[cfg(windows)]
pub fn volume_id(path: &Path) -> Option<u64> {
    let normalized = crate::paths::normalize_path(path);
    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        Some((bytes[0].to_ascii_uppercase() - b'A') as u64)
    } else {
        log::warn!("no drive letter in {}, volume unknown", normalized);
        None
    }
}

/// True iff both volumes are known and identical.
pub fn same_volume(a: Option<u64>, b: Option<u64>) -> bool {
    matches!((a, b), (Some(left), Some(right)) if left == right)
}

/// Whether an I/O error looks like the underlying device went away rather
/// than an ordinary access failure.
pub fn is_disconnect_error(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if let Some(errno) = err.raw_os_error() {
            return errno == libc::EIO || errno == libc::ENODEV;
        }
    }
    let _ = err;
    false
}

/// Whether an I/O error means a rename crossed a volume boundary.
pub fn is_cross_volume_error(err: &io::Error) -> bool {
    match err.raw_os_error() {
        #[cfg(unix)]
        Some(errno) => errno == libc::EXDEV,
        // ERROR_NOT_SAME_DEVICE
        #[cfg(windows)]
        Some(code) => code == 17,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_in_one_directory_share_a_volume() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"1").unwrap();
        std::fs::write(&b, b"2").unwrap();

        let id_a = volume_id(&a);
        let id_b = volume_id(&b);
        assert!(id_a.is_some());
        assert_eq!(id_a, id_b);
        assert!(same_volume(id_a, id_b));
    }

    #[test]
    fn unknown_ids_never_compare_equal() {
        assert!(!same_volume(None, None));
        assert!(!same_volume(Some(1), None));
        assert!(!same_volume(None, Some(1)));
        assert!(same_volume(Some(7), Some(7)));
        assert!(!same_volume(Some(7), Some(8)));
    }

    #[cfg(unix)]
    #[test]
    fn nonexistent_path_has_no_volume() {
        assert_eq!(volume_id(Path::new("/definitely/not/here/xyz")), None);
    }
}
