//! File-set providers.
//!
//! [`FileSource`] hands the reconciler the current files of a project.
//! [`FsFileSource`] walks a checkout on disk, applying include/exclude
//! globs to paths relative to the project root.
//!
//! Files that cannot be loaded are still listed, as
//! [`SourceFile::skipped`] entries, so they show up in the run's report.
//! An unreadable file or directory keeps its indexed chunks; an oversized
//! file or a non-UTF-8 path does not.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use repo_chat_core::chunk::SkipReason;
use repo_chat_core::models::SourceFile;

use crate::config::ProjectConfig;

/// Supplies the complete current file set of one project.
pub trait FileSource: Send + Sync {
    /// Files sorted by relative path. Paths use `/` separators.
    fn scan(&self) -> Result<Vec<SourceFile>>;
}

pub struct FsFileSource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
    max_file_bytes: Option<usize>,
}

impl FsFileSource {
    pub fn new(project: &ProjectConfig) -> Result<Self> {
        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(project.exclude_globs.iter().cloned());

        Ok(Self {
            root: project.root.clone(),
            include: build_globset(&project.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: project.follow_symlinks,
            max_file_bytes: None,
        })
    }

    /// Report larger files as skipped without reading them.
    pub fn with_max_file_bytes(mut self, limit: usize) -> Self {
        self.max_file_bytes = Some(limit);
        self
    }

    fn load(&self, path: &Path, rel: String) -> SourceFile {
        let len = match std::fs::metadata(path) {
            Ok(meta) => meta.len() as usize,
            Err(e) => return unreadable(rel, &e),
        };
        if let Some(limit) = self.max_file_bytes {
            if len > limit {
                return SourceFile::skipped(rel, SkipReason::TooLarge { bytes: len, limit });
            }
        }
        match std::fs::read(path) {
            Ok(bytes) => SourceFile::new(rel, bytes),
            Err(e) => unreadable(rel, &e),
        }
    }
}

fn unreadable(rel: String, err: &dyn std::fmt::Display) -> SourceFile {
    tracing::warn!(file = %rel, error = %err, "file could not be read");
    SourceFile::skipped(rel, SkipReason::Unreadable(err.to_string()))
}

impl FileSource for FsFileSource {
    fn scan(&self) -> Result<Vec<SourceFile>> {
        if !self.root.is_dir() {
            bail!("Project root does not exist: {}", self.root.display());
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    // A directory we cannot list: keep whatever was indexed
                    // below it.
                    let rel = e
                        .path()
                        .and_then(|p| relative_slash_path(p, &self.root))
                        .and_then(|r| r.ok());
                    match rel {
                        Some(rel) if !self.exclude.is_match(&rel) => {
                            files.push(unreadable(rel, &e));
                        }
                        _ => tracing::warn!(error = %e, "skipping unreadable entry"),
                    }
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel = match relative_slash_path(path, &self.root) {
                Some(Ok(rel)) => rel,
                Some(Err(lossy)) => {
                    if !self.exclude.is_match(&lossy) && self.include.is_match(&lossy) {
                        tracing::warn!(file = %lossy, "path is not valid UTF-8");
                        files.push(SourceFile::skipped(lossy, SkipReason::InvalidPath));
                    }
                    continue;
                }
                None => continue,
            };

            if self.exclude.is_match(&rel) || !self.include.is_match(&rel) {
                continue;
            }

            files.push(self.load(path, rel));
        }

        // Sort for deterministic ordering
        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(root = %self.root.display(), files = files.len(), "scanned project");
        Ok(files)
    }
}

/// `path` relative to `root`, joined with `/` regardless of platform.
///
/// `Err` carries a lossy rendering for reporting when a component is not
/// valid UTF-8. Two such paths can render the same, so it is never used as
/// an identity.
fn relative_slash_path(path: &Path, root: &Path) -> Option<Result<String, String>> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    let mut lossless = true;
    for component in relative.components() {
        if let Component::Normal(s) = component {
            match s.to_str() {
                Some(part) => parts.push(part.to_string()),
                None => {
                    lossless = false;
                    parts.push(s.to_string_lossy().into_owned());
                }
            }
        }
    }
    if parts.is_empty() {
        return None;
    }
    let joined = parts.join("/");
    Some(if lossless { Ok(joined) } else { Err(joined) })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
