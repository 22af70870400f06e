//! Directory-backed bundle store
//!
//! Bundles live under one sub-directory per persistence type:
//!
//! ```text
//! <root>/high_priority/<name>.json
//! <root>/regular/<name>.json
//! <root>/fake_crash/<name>.json
//! ```
//!
//! `<name>` is `{unix_nanos:020}-{sequence:010}-{uuid8}`, so lexical order
//! is creation order. Writes go to a `.tmp` sibling and are renamed into
//! place; listings only ever see complete files.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use appinsights_core::domain::PersistenceType;
use chrono::Utc;
use uuid::Uuid;

const BUNDLE_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Entry in the bundle store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub name: String,
    pub persistence_type: PersistenceType,
    pub size_bytes: u64,
    pub path: PathBuf,
}

/// Manages the bundle directories under one root.
#[derive(Debug)]
pub struct BundleStore {
    root: PathBuf,
    sequence: AtomicU64,
}

impl BundleStore {
    /// Creates a store rooted at `root`. Nothing is created on disk yet.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            sequence: AtomicU64::new(0),
        }
    }

    /// Returns the root directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding bundles of `persistence_type`.
    pub fn dir_for(&self, persistence_type: PersistenceType) -> PathBuf {
        self.root.join(persistence_type.as_str())
    }

    /// List complete bundle files of one type, oldest first.
    pub fn list(&self, persistence_type: PersistenceType) -> io::Result<Vec<BundleEntry>> {
        let dir = self.dir_for(persistence_type);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|e| e == BUNDLE_EXTENSION) {
                let name = path
                    .file_stem()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string();
                // A file removed between read_dir and metadata is simply skipped.
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };

                entries.push(BundleEntry {
                    name,
                    persistence_type,
                    size_bytes: metadata.len(),
                    path,
                });
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Number of complete bundle files of one type.
    pub fn count(&self, persistence_type: PersistenceType) -> io::Result<usize> {
        Ok(self.list(persistence_type)?.len())
    }

    /// Number of complete bundle files across every type.
    pub fn count_all(&self) -> io::Result<usize> {
        let mut total = 0;
        for ty in PersistenceType::ALL {
            total += self.count(ty)?;
        }
        Ok(total)
    }

    /// Atomically writes `bytes` as a new bundle file and returns its path.
    pub fn write(&self, persistence_type: PersistenceType, bytes: &[u8]) -> io::Result<PathBuf> {
        let dir = self.dir_for(persistence_type);
        fs::create_dir_all(&dir)?;

        let name = self.next_name();
        let final_path = dir.join(format!("{name}.{BUNDLE_EXTENSION}"));
        let temp_path = dir.join(format!("{name}.{BUNDLE_EXTENSION}.{TEMP_EXTENSION}"));

        let result = (|| {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(final_path)
    }

    /// Moves a complete bundle into the `persistence_type` directory under a
    /// fresh name and returns its new path.
    pub fn relocate(&self, path: &Path, persistence_type: PersistenceType) -> io::Result<PathBuf> {
        let dir = self.dir_for(persistence_type);
        fs::create_dir_all(&dir)?;
        let target = dir.join(format!("{}.{BUNDLE_EXTENSION}", self.next_name()));
        fs::rename(path, &target)?;
        Ok(target)
    }

    /// Read the raw content of a bundle file.
    pub fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    /// Delete a bundle file. Returns `false` when it was already gone.
    pub fn delete(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether `path` names a bundle file inside this store.
    pub fn contains(&self, path: &Path) -> bool {
        self.type_of(path).is_some()
    }

    /// The persistence type a bundle path belongs to, from its directory.
    pub fn type_of(&self, path: &Path) -> Option<PersistenceType> {
        if !path.extension().is_some_and(|e| e == BUNDLE_EXTENSION) {
            return None;
        }
        let parent = path.parent()?;
        PersistenceType::ALL
            .into_iter()
            .find(|ty| parent == self.dir_for(*ty))
    }

    /// Removes `.tmp` files left behind by a write interrupted by process death.
    pub fn remove_stale_temp_files(&self) -> io::Result<usize> {
        let mut removed = 0;
        for ty in PersistenceType::ALL {
            let dir = self.dir_for(ty);
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == TEMP_EXTENSION)
                    && fs::remove_file(&path).is_ok()
                {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn next_name(&self) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = Uuid::new_v4().simple().to_string();
        format!("{nanos:020}-{seq:010}-{}", &id[..8])
    }
}
