//! Microcode image providers.
//!
//! The loader asks for images by file name (`hsc_spu_code.bin`, ...).
//! [`FirmwareDir`] searches directories the way the kernel firmware loader
//! does; [`FirmwareMap`] serves images held in memory.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;

use crate::error::{HscError, Result};

/// System firmware directories, searched after any configured ones.
pub const SYSTEM_FIRMWARE_DIRS: [&str; 2] = ["/lib/firmware/updates", "/lib/firmware"];

/// Source of named microcode images.
pub trait FirmwareSource: fmt::Debug + Send + Sync {
    /// Fetch image `name`.
    ///
    /// # Errors
    ///
    /// `FirmwareNotFound` if no image of that name exists.
    fn fetch(&self, name: &str) -> Result<Bytes>;
}

/// Images looked up in a list of directories, first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareDir {
    dirs: Vec<PathBuf>,
}

impl FirmwareDir {
    /// Search exactly `dirs`.
    pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Search `extra` first, then the system firmware directories.
    pub fn with_system_dirs(extra: &[PathBuf]) -> Self {
        let dirs = extra
            .iter()
            .cloned()
            .chain(SYSTEM_FIRMWARE_DIRS.iter().map(PathBuf::from))
            .collect();
        Self { dirs }
    }

    /// Directories in search order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl FirmwareSource for FirmwareDir {
    fn fetch(&self, name: &str) -> Result<Bytes> {
        let rel = Path::new(name);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(HscError::invalid_argument(format!(
                "firmware name '{name}' must be a relative path"
            )));
        }

        for dir in &self.dirs {
            let path = dir.join(rel);
            match std::fs::read(&path) {
                Ok(data) => {
                    tracing::debug!(
                        "firmware {name}: {} bytes from {}",
                        data.len(),
                        path.display()
                    );
                    return Ok(Bytes::from(data));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("firmware {}: {e}", path.display());
                }
            }
        }
        Err(HscError::firmware_not_found(name))
    }
}

/// Images held in memory.
#[derive(Debug, Clone, Default)]
pub struct FirmwareMap {
    images: HashMap<String, Bytes>,
}

impl FirmwareMap {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace image `name`.
    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.images.insert(name.into(), data.into());
    }

    /// Builder form of [`FirmwareMap::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(name, data);
        self
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl FirmwareSource for FirmwareMap {
    fn fetch(&self, name: &str) -> Result<Bytes> {
        self.images
            .get(name)
            .cloned()
            .ok_or_else(|| HscError::firmware_not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_directory_wins() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(b.path().join("hsc_spu_code.bin"), [1, 2, 3]).unwrap();
        std::fs::write(b.path().join("hsc_ace_code.bin"), [9]).unwrap();
        std::fs::write(a.path().join("hsc_ace_code.bin"), [7, 7]).unwrap();

        let fw = FirmwareDir::new([a.path(), b.path()]);
        assert_eq!(&fw.fetch("hsc_spu_code.bin").unwrap()[..], &[1, 2, 3]);
        assert_eq!(&fw.fetch("hsc_ace_code.bin").unwrap()[..], &[7, 7]);
        assert!(matches!(
            fw.fetch("hsc_spu_data.bin"),
            Err(HscError::FirmwareNotFound { .. })
        ));
    }

    #[test]
    fn rejects_escaping_names() {
        let fw = FirmwareDir::new([std::env::temp_dir()]);
        assert!(matches!(
            fw.fetch("../etc/passwd"),
            Err(HscError::InvalidArgument { .. })
        ));
        assert!(fw.fetch("/etc/passwd").is_err());
    }

    #[test]
    fn system_dirs_follow_extra() {
        let fw = FirmwareDir::with_system_dirs(&[PathBuf::from("/opt/hsc")]);
        assert_eq!(fw.dirs()[0], Path::new("/opt/hsc"));
        assert_eq!(fw.dirs()[2], Path::new("/lib/firmware"));
    }

    #[test]
    fn map_serves_inserted_images() {
        let fw = FirmwareMap::new().with("a.bin", vec![1u8, 2]);
        assert_eq!(fw.len(), 1);
        assert_eq!(&fw.fetch("a.bin").unwrap()[..], &[1, 2]);
        assert!(fw.fetch("b.bin").is_err());
    }
}
