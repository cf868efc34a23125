//! File-based storage backend for persistent storage.

use crate::backend::{validate_key, StorageBackend};
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Default extension appended to every backing file.
pub const DEFAULT_EXTENSION: &str = "dat";

/// A file-based storage backend.
///
/// Every key maps to one file below the root directory: `Planet/Planet-42`
/// becomes `<root>/Planet/Planet-42.<ext>`. Parent directories are created on
/// demand.
///
/// # Durability
///
/// `write` removes the old file and then creates and writes a new one. Nothing
/// is fsynced; a crash between the removal and the write loses the file.
///
/// # Example
///
/// ```no_run
/// use shelfdb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("store")).unwrap();
/// backend.write("Planet", b"persistent data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    extension: String,
    mutation: Mutex<()>,
}

impl FileBackend {
    /// Opens a backend rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            extension: DEFAULT_EXTENSION.to_string(),
            mutation: Mutex::new(()),
        })
    }

    /// Uses `extension` (without the dot) for backing files.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the backing file extension.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Maps a key onto its backing file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid.
    pub fn path_of(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        let mut file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        file_name.push(".");
        file_name.push(&self.extension);
        path.set_file_name(file_name);
        Ok(path)
    }

    fn collect_keys(&self, dir: &Path, prefix: &str, keys: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if entry.file_type()?.is_dir() {
                let nested = format!("{prefix}{name}/");
                self.collect_keys(&path, &nested, keys)?;
            } else if let Some(stem) = name.strip_suffix(&format!(".{}", self.extension)) {
                keys.push(format!("{prefix}{stem}"));
            }
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_of(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.path_of(key)?;
        let _guard = self.mutation.lock();

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_of(key)?;
        let _guard = self.mutation.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.path_of(key)?.is_file())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        if self.root.is_dir() {
            self.collect_keys(&self.root, "", &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_open_creates_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");

        let backend = FileBackend::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(backend.root(), root.as_path());
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("Planet", b"hello").unwrap();
        assert_eq!(backend.read("Planet").unwrap().unwrap(), b"hello");
        assert!(dir.path().join("Planet.dat").is_file());
    }

    #[test]
    fn file_nested_key_creates_dirs() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("Planet/Planet-42", b"x").unwrap();
        assert!(dir.path().join("Planet").join("Planet-42.dat").is_file());
    }

    #[test]
    fn file_missing_reads_none() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read("nothing").unwrap(), None);
        assert!(!backend.exists("nothing").unwrap());
    }

    #[test]
    fn file_write_replaces_longer_content() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("k", b"a much longer first version").unwrap();
        backend.write("k", b"short").unwrap();
        assert_eq!(backend.read("k").unwrap().unwrap(), b"short");
    }

    #[test]
    fn file_remove() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("k", b"v").unwrap();
        backend.remove("k").unwrap();
        backend.remove("k").unwrap();
        assert!(!backend.exists("k").unwrap());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.write("Moon/Moon-1", b"persisted").unwrap();
        }
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read("Moon/Moon-1").unwrap().unwrap(), b"persisted");
    }

    #[test]
    fn file_keys_skip_foreign_files() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.write("Planet", b"").unwrap();
        backend.write("Planet/Planet-1", b"").unwrap();
        fs::write(dir.path().join("LOCK"), b"").unwrap();

        assert_eq!(backend.keys().unwrap(), vec!["Planet", "Planet/Planet-1"]);
    }

    #[test]
    fn file_custom_extension() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap().with_extension("json");
        backend.write("Planet", b"[]").unwrap();

        assert!(dir.path().join("Planet.json").is_file());
        assert_eq!(backend.extension(), "json");
    }

    #[test]
    fn file_rejects_escaping_key() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert!(backend.write("../outside", b"x").is_err());
    }

    mod properties {
        use super::*;
        use crate::memory::InMemoryBackend;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Write(String, Vec<u8>),
            Remove(String),
        }

        fn arb_key() -> impl Strategy<Value = String> {
            prop::sample::select(vec!["Planet", "Moon-refs", "Moon/Moon-1", "Moon/Moon-2", "Star/Star-fragment-a"])
                .prop_map(str::to_string)
        }

        fn arb_op() -> impl Strategy<Value = Op> {
            prop_oneof![
                3 => (arb_key(), prop::collection::vec(any::<u8>(), 0..32)).prop_map(|(k, v)| Op::Write(k, v)),
                1 => arb_key().prop_map(Op::Remove),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn file_backend_agrees_with_memory(ops in prop::collection::vec(arb_op(), 1..24)) {
                let dir = tempdir().unwrap();
                let files = FileBackend::open(dir.path()).unwrap();
                let memory = InMemoryBackend::new();

                for op in &ops {
                    match op {
                        Op::Write(key, data) => {
                            files.write(key, data).unwrap();
                            memory.write(key, data).unwrap();
                        }
                        Op::Remove(key) => {
                            files.remove(key).unwrap();
                            memory.remove(key).unwrap();
                        }
                    }
                }

                prop_assert_eq!(files.keys().unwrap(), memory.keys().unwrap());
                for key in memory.keys().unwrap() {
                    prop_assert_eq!(files.read(&key).unwrap(), memory.read(&key).unwrap());
                }
            }
        }
    }
}
