//! Code distribution: publish and pull of managed source files.
//!
//! A pool deployment nominates one instance as publisher; every other
//! instance polls for drift between its local file hash and the most
//! recently published version, pulls the file map when they differ, and asks
//! its supervisor to restart the process image. File contents travel through
//! the same database as the job queue, there is no side channel.

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use pool_db::{FileMap, PoolDb, Published, VersionHash, version_hash_of};

/// Result of comparing local managed files against the published version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    /// Local files match the latest published version
    UpToDate,
    /// A different version is published; carries its hash
    Drifted(VersionHash),
    /// Nothing has been published yet
    NoPublishedVersion,
}

/// Publishes and pulls managed source files through the database.
#[derive(Debug, Clone)]
pub struct Updater {
    db: PoolDb,
    code_root: PathBuf,
    managed_files: Vec<String>,
    identity: String,
}

impl Updater {
    pub fn new(
        db: PoolDb,
        code_root: PathBuf,
        managed_files: Vec<String>,
        identity: String,
    ) -> Self {
        Self {
            db,
            code_root,
            managed_files,
            identity,
        }
    }

    /// Reads the managed files into a file map.
    ///
    /// The managed set is fixed configuration; a file that cannot be read is
    /// an error, not a gap in the snapshot, since a partial snapshot would
    /// publish (or hash) a version that no instance actually has on disk.
    fn snapshot(&self) -> Result<FileMap, UpdateError> {
        let mut files = FileMap::new();
        for rel_path in &self.managed_files {
            let path = self.code_root.join(rel_path);
            let contents = fs::read_to_string(&path)
                .map_err(|source| UpdateError::ReadFile { path, source })?;
            files.insert(rel_path.clone(), contents);
        }
        Ok(files)
    }

    /// Hash of the local managed files.
    pub fn local_hash(&self) -> Result<VersionHash, UpdateError> {
        Ok(version_hash_of(&self.snapshot()?))
    }

    /// Publishes the local managed files as the current code version.
    #[tracing::instrument(skip(self), err)]
    pub async fn publish(&self) -> Result<(VersionHash, Published), UpdateError> {
        let files = self.snapshot()?;
        let hash = version_hash_of(&files);
        let published = self
            .db
            .publish_code_version(&hash, &files, &self.identity)
            .await?;
        match published {
            Published::New => {
                tracing::info!(version = %hash.short(), "published new code version");
            }
            Published::Unchanged => {
                tracing::debug!(version = %hash.short(), "code version already published");
            }
        }
        Ok((hash, published))
    }

    /// Compares the local file hash against the latest published version.
    #[tracing::instrument(skip(self), err)]
    pub async fn check(&self) -> Result<UpdateCheck, UpdateError> {
        let Some(latest) = self.db.latest_code_version().await? else {
            return Ok(UpdateCheck::NoPublishedVersion);
        };
        if latest.version_hash == self.local_hash()? {
            Ok(UpdateCheck::UpToDate)
        } else {
            Ok(UpdateCheck::Drifted(latest.version_hash))
        }
    }

    /// Fetches a published version and writes its files to the code root.
    ///
    /// Every file that already exists is first copied to `<file>.bak`, so a
    /// bad update can be rolled back by hand. The caller is responsible for
    /// restarting the process afterwards.
    #[tracing::instrument(skip(self), err)]
    pub async fn pull_and_apply(&self, hash: &VersionHash) -> Result<(), UpdateError> {
        let files = self
            .db
            .code_version_files(hash)
            .await?
            .ok_or_else(|| UpdateError::VersionNotFound(hash.clone()))?;

        apply_files(&self.code_root, &files)?;
        tracing::info!(version = %hash.short(), files = files.len(), "applied code version");
        Ok(())
    }
}

/// Writes a file map under `code_root`, backing up existing files.
fn apply_files(code_root: &Path, files: &FileMap) -> Result<(), UpdateError> {
    for (rel_path, contents) in files {
        // Published paths come from the database, never let them escape the
        // code root.
        let rel = Path::new(rel_path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(UpdateError::UnsafePath(rel_path.clone()));
        }

        let path = code_root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| UpdateError::WriteFile {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        if path.exists() {
            let backup = PathBuf::from(format!("{}.bak", path.display()));
            fs::copy(&path, &backup).map_err(|source| UpdateError::WriteFile {
                path: backup,
                source,
            })?;
        }
        fs::write(&path, contents)
            .map_err(|source| UpdateError::WriteFile { path, source })?;
    }
    Ok(())
}

/// Errors from publishing or applying code versions.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("failed to read managed file '{path}'")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file '{path}'")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("refusing to apply file with unsafe path '{0}'")]
    UnsafePath(String),

    #[error("code version '{0}' not found")]
    VersionNotFound(VersionHash),

    #[error(transparent)]
    Database(#[from] pool_db::Error),
}
