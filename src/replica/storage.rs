//! Backing Image Management
//!
//! Creates the fixed-size image files that back replica storage objects.

use crate::domain::ports::StorageObject;
use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extension of backing image files
const IMAGE_EXTENSION: &str = "img";

/// Result of preparing a backing image
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub object: StorageObject,
    /// Whether the file was created by this call
    pub created: bool,
}

/// Image file operations for storage objects
pub struct StorageObjectManager;

impl StorageObjectManager {
    /// Path of the image backing `id` inside `dir`
    pub fn image_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{}.{}", id, IMAGE_EXTENSION))
    }

    /// Prepare the backing image for a storage object.
    ///
    /// The directory must exist. An existing image is reused as-is and never
    /// truncated or extended; otherwise a sparse file of `size_bytes` is
    /// created.
    pub fn prepare(dir: &Path, id: &str, size_bytes: u64) -> Result<PreparedImage> {
        Self::validate_id(id)?;

        if !dir.is_dir() {
            return Err(Error::Validation(format!(
                "path {} doesn't exists",
                dir.display()
            )));
        }

        let path = Self::image_path(dir, id);
        let created = !path.exists();
        if !created {
            warn!("warning: file {} already exists", path.display());
        } else {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;
            file.set_len(size_bytes)?;
            info!("Created backing image {} ({} bytes)", path.display(), size_bytes);
        }

        Ok(PreparedImage {
            object: StorageObject {
                name: id.to_string(),
                path,
                size_bytes,
            },
            created,
        })
    }

    /// Remove a backing image, if present
    pub fn remove_image(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!("Removed backing image {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Backing image {} already gone", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() || id.contains('/') || id == "." || id == ".." {
            return Err(Error::Validation(format!("invalid file id: {:?}", id)));
        }
        Ok(())
    }
}

/// Parse an image size: plain bytes or a binary-suffixed value ("512Mi", "10G")
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Validation(format!("invalid size {:?}", s)))?;

    let shift = match unit.trim().to_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KI" | "KIB" => 10,
        "M" | "MI" | "MIB" => 20,
        "G" | "GI" | "GIB" => 30,
        "T" | "TI" | "TIB" => 40,
        other => {
            return Err(Error::Validation(format!(
                "invalid size {:?}: unknown unit {}",
                s, other
            )))
        }
    };

    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| Error::Validation(format!("size {:?} is too large", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1048576").unwrap(), 1 << 20);
        assert_eq!(parse_size("512Mi").unwrap(), 512 << 20);
        assert_eq!(parse_size("10G").unwrap(), 10 << 30);
        assert_eq!(parse_size(" 4k ").unwrap(), 4096);

        assert!(parse_size("").is_err());
        assert!(parse_size("lots").is_err());
        assert!(parse_size("10X").is_err());
        assert!(parse_size("99999999999T").is_err());
    }

    #[test]
    fn test_image_path() {
        let path = StorageObjectManager::image_path(Path::new("/var/lib/replica"), "vol1");
        assert_eq!(path, PathBuf::from("/var/lib/replica/vol1.img"));
    }

    #[test]
    fn test_prepare_creates_sparse_image() {
        let dir = tempfile::tempdir().unwrap();
        let prepared = StorageObjectManager::prepare(dir.path(), "vol1", 4 * 1024 * 1024).unwrap();
        let object = prepared.object;

        assert!(prepared.created);
        assert_eq!(object.name, "vol1");
        assert_eq!(object.path, dir.path().join("vol1.img"));
        assert_eq!(std::fs::metadata(&object.path).unwrap().len(), 4 * 1024 * 1024);
    }

    #[test]
    fn test_prepare_keeps_existing_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol1.img");
        std::fs::write(&path, b"existing data").unwrap();

        let prepared = StorageObjectManager::prepare(dir.path(), "vol1", 1 << 30).unwrap();

        assert!(!prepared.created);
        assert_eq!(prepared.object.path, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"existing data");
    }

    #[test]
    fn test_prepare_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let err = StorageObjectManager::prepare(&missing, "vol1", 1024).unwrap_err();
        assert_matches!(err, Error::Validation(msg) if msg.contains("doesn't exists"));
    }

    #[test]
    fn test_prepare_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StorageObjectManager::prepare(dir.path(), "../escape", 1024).is_err());
        assert!(StorageObjectManager::prepare(dir.path(), "", 1024).is_err());
    }

    #[test]
    fn test_remove_image_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let object = StorageObjectManager::prepare(dir.path(), "vol1", 1024).unwrap().object;

        StorageObjectManager::remove_image(&object.path).unwrap();
        assert!(!object.path.exists());
        StorageObjectManager::remove_image(&object.path).unwrap();
    }
}
