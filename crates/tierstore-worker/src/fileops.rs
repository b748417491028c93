//! File operation primitives consumed by the block store
//!
//! The store never touches the filesystem directly; it goes through the
//! [`FileOps`] collaborator so the I/O layer can be swapped out. The
//! default [`LocalFileOps`] maps straight onto `std::fs`.

use bytes::Bytes;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tierstore_common::Result;

/// Append-only writer over an open temp block file
///
/// The writer reserves no space itself; callers grow the block's
/// reservation through `request_space` before appending.
pub trait BlockWriter: Send + std::fmt::Debug {
    /// Append a payload, returning the number of bytes written
    fn append(&mut self, data: Bytes) -> Result<u64>;

    /// Flush buffered data to the underlying file
    fn flush(&mut self) -> Result<()>;
}

/// Filesystem primitives used by the block store
pub trait FileOps: Send + Sync {
    /// Whether a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Size of a file in bytes
    fn size(&self, path: &Path) -> Result<u64>;

    /// Delete a single file
    fn delete(&self, path: &Path) -> Result<()>;

    /// Rename a file; must be atomic within one filesystem
    fn rename(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Create a directory and all missing parents
    fn create_dirs(&self, path: &Path) -> Result<()>;

    /// Remove a directory tree; absent paths are not an error
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// List the plain files directly under a directory
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Open an append writer, creating the file and missing parents
    fn create_writer(&self, path: &Path) -> Result<Box<dyn BlockWriter>>;
}

/// [`FileOps`] over the local filesystem
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileOps;

impl FileOps for LocalFileOps {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn rename(&self, src: &Path, dst: &Path) -> Result<()> {
        fs::rename(src, dst)?;
        Ok(())
    }

    fn create_dirs(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    fn create_writer(&self, path: &Path) -> Result<Box<dyn BlockWriter>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(LocalBlockWriter { file }))
    }
}

#[derive(Debug)]
struct LocalBlockWriter {
    file: File,
}

impl BlockWriter for LocalBlockWriter {
    fn append(&mut self, data: Bytes) -> Result<u64> {
        self.file.write_all(&data)?;
        Ok(data.len() as u64)
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writer_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tmp").join("2").join("1000");

        let ops = LocalFileOps;
        let mut writer = ops.create_writer(&path).unwrap();
        assert_eq!(writer.append(Bytes::from_static(b"hello")).unwrap(), 5);
        writer.append(Bytes::from_static(b" world")).unwrap();
        writer.flush().unwrap();
        drop(writer);

        assert!(ops.exists(&path));
        assert_eq!(ops.size(&path).unwrap(), 11);
    }

    #[test]
    fn test_rename_and_delete() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");

        let ops = LocalFileOps;
        let mut writer = ops.create_writer(&src).unwrap();
        writer.append(Bytes::from_static(b"x")).unwrap();
        drop(writer);

        ops.rename(&src, &dst).unwrap();
        assert!(!ops.exists(&src));
        assert!(ops.exists(&dst));

        ops.delete(&dst).unwrap();
        assert!(!ops.exists(&dst));
        assert!(ops.delete(&dst).is_err());
    }

    #[test]
    fn test_list_files_skips_directories() {
        let dir = tempdir().unwrap();
        let ops = LocalFileOps;
        ops.create_dirs(&dir.path().join("tmp")).unwrap();
        drop(ops.create_writer(&dir.path().join("1000")).unwrap());
        drop(ops.create_writer(&dir.path().join("1001")).unwrap());

        let mut names: Vec<String> = ops
            .list_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["1000", "1001"]);
    }

    #[test]
    fn test_remove_dir_all_is_idempotent() {
        let dir = tempdir().unwrap();
        let ops = LocalFileOps;
        let path = dir.path().join("gone");
        assert!(ops.remove_dir_all(&path).is_ok());
        ops.create_dirs(&path).unwrap();
        assert!(ops.remove_dir_all(&path).is_ok());
        assert!(!ops.exists(&path));
    }
}
