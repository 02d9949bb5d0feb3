//! Document keys.
//!
//! A document key is the absolute path of a markdown file, truncated at the
//! configured root markers so that checkouts living under different parent
//! directories (a CI workspace and a developer clone, say) agree on the key:
//!
//! ```rust
//! use kb_sync::paths::document_key;
//!
//! let roots = vec!["docs/".to_string()];
//! assert_eq!(document_key("/home/a/docs/x.md", &roots), "docs/x.md");
//! assert_eq!(document_key("/ci/build/docs/x.md", &roots), "docs/x.md");
//! ```

use std::path::Path;

/// Truncate `absolute_path` at each root marker in turn.
///
/// Markers are applied in order and each one operates on the result of the
/// previous one. A marker that does not occur leaves the path untouched, so
/// with no matching marker the key is the absolute path itself.
pub fn document_key(absolute_path: &str, roots: &[String]) -> String {
    let mut key = absolute_path;
    for root in roots {
        if let Some(idx) = key.find(root.as_str()) {
            key = &key[idx..];
        }
    }
    key.to_string()
}

/// Key for a file on disk. Relative paths are resolved against the working directory.
pub fn key_for_path(path: &Path, roots: &[String]) -> std::io::Result<String> {
    let absolute = std::path::absolute(path)?;
    Ok(document_key(&absolute.to_string_lossy(), roots))
}

/// Name shown when an answer cites a remote file: its key without `.md`.
pub fn related_document_name(display_name: &str) -> &str {
    display_name
        .strip_suffix(crate::walk::MARKDOWN_EXTENSION)
        .unwrap_or(display_name)
}
