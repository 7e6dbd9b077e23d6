// Content blobs too large for an inline document
use anyhow::Context;
use atomicwrites::{AtomicFile, OverwriteBehavior};
use fuzzrec_core::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Flat directory of blobs named by random ids.
pub struct BlobStore {
    dir: PathBuf,
}

fn storage_err(e: anyhow::Error) -> Error {
    Error::Storage(format!("{:#}", e))
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", id))
    }

    /// Write `data` atomically and return its id.
    pub fn put(&self, data: &[u8]) -> Result<String> {
        let write = || -> anyhow::Result<String> {
            std::fs::create_dir_all(&self.dir)
                .with_context(|| format!("creating {}", self.dir.display()))?;
            let id = Uuid::new_v4().to_string();
            let file = AtomicFile::new(self.path(&id), OverwriteBehavior::DisallowOverwrite);
            file.write(|f| f.write_all(data))
                .with_context(|| format!("writing blob {}", id))?;
            Ok(id)
        };
        write().map_err(storage_err)
    }

    pub fn get(&self, id: &str) -> Result<Vec<u8>> {
        match std::fs::read(self.path(id)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("blob {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        match std::fs::remove_file(self.path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every blob.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
