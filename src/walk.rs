//! Markdown discovery.
//!
//! [`markdown_files`] checks that a location is readable and returns a lazy
//! iterator over the markdown files beneath it. [`load_document`] turns one
//! of those paths into a keyed, fingerprinted [`LocalDocument`]. Neither
//! touches engine state; the sync engine strings them together.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::fingerprint::fingerprint;
use crate::models::LocalDocument;
use crate::paths::key_for_path;

pub const MARKDOWN_EXTENSION: &str = ".md";

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/node_modules/**"];

/// Iterator over regular markdown files under a location, in file-name order.
///
/// Symlinks are not followed and are not yielded. Errors reading a
/// subdirectory are yielded as items so the caller can log them and move on.
pub struct MarkdownFiles {
    root: PathBuf,
    inner: walkdir::IntoIter,
    exclude: GlobSet,
}

impl Iterator for MarkdownFiles {
    type Item = Result<PathBuf, walkdir::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };

            if !entry.file_type().is_file() || !is_markdown(entry.path()) {
                continue;
            }

            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            if self.exclude.is_match(relative) {
                continue;
            }

            return Some(Ok(entry.into_path()));
        }
    }
}

/// Start walking `location`.
///
/// Fails if the location itself cannot be read or a glob is invalid; errors
/// deeper in the tree surface through the iterator instead.
pub fn markdown_files(location: &Path, exclude_globs: &[String]) -> Result<MarkdownFiles> {
    std::fs::read_dir(location)
        .with_context(|| format!("Failed to read directory: {}", location.display()))?;

    let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
    patterns.extend(exclude_globs.iter().cloned());
    let exclude = build_globset(&patterns)?;

    Ok(MarkdownFiles {
        root: location.to_path_buf(),
        inner: WalkDir::new(location)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter(),
        exclude,
    })
}

/// Read, key, and fingerprint one markdown file.
pub fn load_document(path: &Path, roots: &[String]) -> std::io::Result<LocalDocument> {
    let content = std::fs::read_to_string(path)?;
    let key = key_for_path(path, roots)?;
    let fingerprint = fingerprint(&content);
    Ok(LocalDocument {
        path: path.to_path_buf(),
        key,
        fingerprint,
        content,
    })
}

fn is_markdown(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(MARKDOWN_EXTENSION))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
