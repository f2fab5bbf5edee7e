//! Small filesystem helpers shared by storage and the facade: enumerating
//! segment ids, checking directory existence, and normalizing the
//! configured segment size.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default active-file rotation threshold: 256 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;

const SEGMENT_EXT: &str = "dat";

/// Path of the segment file for `fid` inside `dir`.
pub fn segment_path(dir: &Path, fid: u64) -> PathBuf {
    dir.join(format!("{fid}.{SEGMENT_EXT}"))
}

/// Returns the ids of all `<fid>.dat` files in `dir`, ascending. Files whose
/// extension doesn't match are ignored; a matching file whose stem doesn't
/// parse as a non-negative decimal integer is a hard error.
pub fn list_segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(SEGMENT_EXT) {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidSegmentName(path.display().to_string()))?;
        let fid: u64 =
            stem.parse().map_err(|_| Error::InvalidSegmentName(path.display().to_string()))?;
        ids.push(fid);
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Distinguishes "path does not exist" from other stat errors, which are
/// propagated.
pub fn dir_exists(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Returns the default segment size (256 MiB) when `configured <= 0`,
/// otherwise `configured`.
pub fn effective_segment_size(configured: i64) -> u64 {
    if configured <= 0 {
        DEFAULT_SEGMENT_SIZE
    } else {
        configured as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn effective_segment_size_defaults_on_non_positive() {
        assert_eq!(effective_segment_size(0), DEFAULT_SEGMENT_SIZE);
        assert_eq!(effective_segment_size(-1), DEFAULT_SEGMENT_SIZE);
        assert_eq!(effective_segment_size(4096), 4096);
    }

    #[test]
    fn dir_exists_distinguishes_absent_from_present() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(dir_exists(tmp.path()).unwrap());
        assert!(!dir_exists(&tmp.path().join("nope")).unwrap());
    }

    #[test]
    fn list_segment_ids_ignores_non_matching_files() {
        let tmp = tempfile::tempdir().unwrap();
        File::create(tmp.path().join("0.dat")).unwrap();
        File::create(tmp.path().join("2.dat")).unwrap();
        File::create(tmp.path().join("1.dat")).unwrap();
        File::create(tmp.path().join("db.lock")).unwrap();
        File::create(tmp.path().join("README.md")).unwrap();

        assert_eq!(list_segment_ids(tmp.path()).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn list_segment_ids_errors_on_unparseable_stem() {
        let tmp = tempfile::tempdir().unwrap();
        File::create(tmp.path().join("abc.dat")).unwrap();
        assert!(list_segment_ids(tmp.path()).is_err());
    }
}
