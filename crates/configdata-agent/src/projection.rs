//! # Atomic Projection Writer
//!
//! Publishes a complete path → content set into a mount directory so that a
//! reader sees either the whole old tree or the whole new one.
//!
//! Layout of a mount directory:
//!
//! ```text
//! <mount>/
//!   ..data      -> ..a1B2c3          (symlink, swapped atomically)
//!   ..a1B2c3/etc/k1                 (the published tree)
//!   etc         -> ..data/etc        (one link per top-level entry)
//! ```
//!
//! A write builds the new tree in a fresh `..<random>` directory, points
//! `..data_tmp` at it and renames `..data_tmp` over `..data`. The rename is the
//! only step readers can observe. Until it happens the new directory is a
//! scoped temporary directory, removed on every exit path, so an interrupted
//! write leaves the published tree untouched. [`AtomicWriter::write`] does no
//! `await`ing, which keeps a cancelled sync from stopping halfway.

use crate::binding::check_relative_path;
use crate::error::ProjectionError;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Symlink naming the currently published data directory.
pub const DATA_DIR_LINK: &str = "..data";

const NEW_DATA_DIR_LINK: &str = "..data_tmp";

/// Desired file tree: relative path → exact file content.
pub type Payload = BTreeMap<String, String>;

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

fn read_link_opt(path: &Path) -> Result<Option<PathBuf>, ProjectionError> {
    match fs::read_link(path) {
        Ok(target) => Ok(Some(target)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProjectionError::io("read link", path, e)),
    }
}

fn remove_link_if_present(path: &Path) -> Result<(), ProjectionError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProjectionError::io("remove", path, e)),
    }
}

fn first_component(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// Writes payloads into one mount directory.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    target_dir: PathBuf,
}

impl AtomicWriter {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Directory currently published under `..data`, if any.
    pub fn published_dir(&self) -> Result<Option<PathBuf>, ProjectionError> {
        Ok(read_link_opt(&self.target_dir.join(DATA_DIR_LINK))?.map(|t| self.target_dir.join(t)))
    }

    /// Replaces the published tree with `payload`.
    pub fn write(&self, payload: &Payload) -> Result<(), ProjectionError> {
        for path in payload.keys() {
            check_relative_path(path).map_err(|reason| ProjectionError::InvalidPath {
                path: path.clone(),
                reason,
            })?;
        }

        fs::create_dir_all(&self.target_dir)
            .map_err(|e| ProjectionError::io("create directory", &self.target_dir, e))?;

        self.check_top_level_entries(payload)?;

        let data_link = self.target_dir.join(DATA_DIR_LINK);
        let old_data_dir = read_link_opt(&data_link)?;

        // Dropped (and deleted) on every early return below.
        let staging = tempfile::Builder::new()
            .prefix("..")
            .tempdir_in(&self.target_dir)
            .map_err(|e| ProjectionError::io("create staging directory", &self.target_dir, e))?;

        for (path, content) in payload {
            let file = staging.path().join(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| ProjectionError::io("create directory", parent, e))?;
            }
            fs::write(&file, content.as_bytes())
                .map_err(|e| ProjectionError::io("write", &file, e))?;
        }

        let staging_name = staging
            .path()
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| ProjectionError::InvalidPath {
                path: staging.path().display().to_string(),
                reason: "staging directory has no name".to_string(),
            })?;

        let new_link = self.target_dir.join(NEW_DATA_DIR_LINK);
        remove_link_if_present(&new_link)?;
        symlink(&staging_name, &new_link)
            .map_err(|e| ProjectionError::io("create symlink", &new_link, e))?;

        if let Err(e) = fs::rename(&new_link, &data_link) {
            let _ = fs::remove_file(&new_link);
            return Err(ProjectionError::io("swap data link", &data_link, e));
        }
        // Published: from here on the directory must outlive the guard.
        let new_data_dir = staging.keep();
        debug!(
            mount = %self.target_dir.display(),
            data_dir = %new_data_dir.display(),
            files = payload.len(),
            "Published projection"
        );

        self.update_top_level_links(payload)?;

        if let Some(old) = old_data_dir {
            let old = self.target_dir.join(old);
            if old != new_data_dir {
                if let Err(e) = fs::remove_dir_all(&old) {
                    warn!(path = %old.display(), error = %e, "Could not remove previous data directory");
                }
            }
        }
        Ok(())
    }

    /// Fails if a top-level name the payload needs is taken by anything other
    /// than one of our `..data` links. Runs before staging so nothing is
    /// published on conflict.
    fn check_top_level_entries(&self, payload: &Payload) -> Result<(), ProjectionError> {
        for path in payload.keys() {
            let name = first_component(path);
            let link = self.target_dir.join(name);
            let metadata = match fs::symlink_metadata(&link) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ProjectionError::io("stat", &link, e)),
            };
            let ours = metadata.file_type().is_symlink()
                && read_link_opt(&link)?.is_some_and(|t| t.starts_with(DATA_DIR_LINK));
            if !ours {
                warn!(path = %link.display(), "Projected name taken by a foreign entry");
                return Err(ProjectionError::InvalidPath {
                    path: path.clone(),
                    reason: format!("{} exists and is not a projection link", link.display()),
                });
            }
        }
        Ok(())
    }

    /// Ensures one `name -> ..data/name` link per top-level entry and removes
    /// links for entries that are gone.
    fn update_top_level_links(&self, payload: &Payload) -> Result<(), ProjectionError> {
        let wanted: BTreeSet<&str> = payload.keys().map(|p| first_component(p)).collect();

        for name in &wanted {
            let link = self.target_dir.join(name);
            if fs::symlink_metadata(&link).is_ok() {
                continue;
            }
            let target = Path::new(DATA_DIR_LINK).join(name);
            symlink(&target, &link).map_err(|e| ProjectionError::io("create symlink", &link, e))?;
        }

        let entries = fs::read_dir(&self.target_dir)
            .map_err(|e| ProjectionError::io("read directory", &self.target_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ProjectionError::io("read directory", &self.target_dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with("..") || wanted.contains(name) {
                continue;
            }
            let is_link = entry
                .file_type()
                .map(|t| t.is_symlink())
                .unwrap_or(false);
            if !is_link {
                continue;
            }
            let path = entry.path();
            // Only links we made point into ..data.
            if let Some(target) = read_link_opt(&path)? {
                if target.starts_with(DATA_DIR_LINK) {
                    remove_link_if_present(&path)?;
                }
            }
        }
        Ok(())
    }

    /// Reads back the published tree.
    pub fn read_published(&self) -> Result<Payload, ProjectionError> {
        let mut payload = Payload::new();
        if let Some(dir) = self.published_dir()? {
            collect_files(&dir, &dir, &mut payload)?;
        }
        Ok(payload)
    }
}

fn collect_files(root: &Path, dir: &Path, payload: &mut Payload) -> Result<(), ProjectionError> {
    let entries = fs::read_dir(dir).map_err(|e| ProjectionError::io("read directory", dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ProjectionError::io("read directory", dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| ProjectionError::io("stat", &path, e))?;
        if file_type.is_dir() {
            collect_files(root, &path, payload)?;
        } else {
            let content =
                fs::read_to_string(&path).map_err(|e| ProjectionError::io("read", &path, e))?;
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            payload.insert(relative, content);
        }
    }
    Ok(())
}
