//! Attachment naming, sandboxing and reference rewriting.
//!
//! Every attachment is stored as `<root>/<ext>/attachment_<id>_<safe name>`
//! and linked from Markdown with the matching `./<ext>/...` relative path.
//! Filenames arrive from the forum and are never trusted.

use std::path::{Component, Path, PathBuf};

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::convert::is_code_fence;
use crate::model::FileRef;

pub const PLACEHOLDER_FILENAME: &str = "unnamed_file";
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

const UNKNOWN_EXTENSION: &str = "unknown";

lazy_static! {
    static ref ATTACH_TOKEN: Regex = Regex::new(
        r"(?i)\[attach=(\d+)\]|\[attach(?:=[a-z]+|\s[^\]]*)?\]\s*(\d+)\s*\[/attach\]"
    ).unwrap();
    static ref ANY_ATTACH_TOKEN: Regex =
        Regex::new(r"(?i)\[attach[^\]]*\](?:\s*\d+\s*\[/attach\])?").unwrap();
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path {0} escapes the attachment root")]
    Traversal(PathBuf),
    #[error("cannot resolve {path}: {message}")]
    Resolve { path: PathBuf, message: String },
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}' | '\u{7F}')
}

/// Reduces an untrusted name to a single safe path component.
///
/// Directory parts are dropped, forbidden characters become `_`, and names
/// that end up empty, `.` or `..` fall back to [`PLACEHOLDER_FILENAME`].
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = last
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    match cleaned {
        "" | "." | ".." => PLACEHOLDER_FILENAME.to_string(),
        _ => cleaned.to_string(),
    }
}

/// Lowercased extension of `name`, or `unknown`.
pub fn file_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| UNKNOWN_EXTENSION.to_string())
}

pub fn is_image_extension(extension: &str) -> bool {
    IMAGE_EXTENSIONS
        .iter()
        .any(|image| image.eq_ignore_ascii_case(extension))
}

/// Fails unless `candidate`, once made absolute and normalized, lies under `root`.
pub fn validate_path(candidate: &Path, root: &Path) -> Result<(), PathError> {
    let candidate_abs = absolute_normalized(candidate)?;
    let root_abs = absolute_normalized(root)?;
    match relative_to(&candidate_abs, &root_abs) {
        Some(relative)
            if !relative.is_absolute()
                && !relative.components().any(|c| c == Component::ParentDir) =>
        {
            Ok(())
        }
        _ => Err(PathError::Traversal(candidate.to_path_buf())),
    }
}

fn absolute_normalized(path: &Path) -> Result<PathBuf, PathError> {
    let absolute = std::path::absolute(path).map_err(|err| PathError::Resolve {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Component-wise relative path; `None` when the roots differ.
fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    let mut path_parts = path.components().peekable();
    let mut base_parts = base.components().peekable();
    while let (Some(p), Some(b)) = (path_parts.peek(), base_parts.peek()) {
        if p != b {
            break;
        }
        path_parts.next();
        base_parts.next();
    }
    let mut relative = PathBuf::new();
    for part in base_parts {
        match part {
            Component::Normal(_) => relative.push(".."),
            _ => return None,
        }
    }
    for part in path_parts {
        match part {
            Component::Normal(name) => relative.push(name),
            _ => return None,
        }
    }
    Some(relative)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub text: String,
    /// Attachment tokens that matched no known attachment, in order of appearance.
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AttachmentLinker {
    sandbox_root: PathBuf,
}

impl AttachmentLinker {
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
        }
    }

    pub fn sandbox_root(&self) -> &Path {
        &self.sandbox_root
    }

    pub fn stored_name(&self, file: &FileRef) -> String {
        format!("attachment_{}_{}", file.id, sanitize_filename(&file.filename))
    }

    pub fn extension_dir(&self, file: &FileRef) -> String {
        file_extension(&sanitize_filename(&file.filename))
    }

    pub fn local_path(&self, file: &FileRef) -> PathBuf {
        self.sandbox_root
            .join(self.extension_dir(file))
            .join(self.stored_name(file))
    }

    pub fn relative_link(&self, file: &FileRef) -> String {
        let link = format!("./{}/{}", self.extension_dir(file), self.stored_name(file));
        link.replace(' ', "%20")
    }

    fn markdown_for(&self, file: &FileRef) -> String {
        let alt = sanitize_filename(&file.filename)
            .replace('[', "\\[")
            .replace(']', "\\]");
        let link = self.relative_link(file);
        if is_image_extension(&self.extension_dir(file)) {
            format!("![{alt}]({link})")
        } else {
            format!("[{alt}]({link})")
        }
    }

    /// Replaces every attachment token whose id is known with a Markdown link.
    ///
    /// Lines inside fenced code blocks are copied verbatim and never reported.
    pub fn rewrite_references(&self, text: &str, files: &[FileRef]) -> RewriteOutcome {
        let mut in_fence = false;
        let mut lines = Vec::new();
        let mut unresolved = Vec::new();
        for line in text.split('\n') {
            if is_code_fence(line) {
                in_fence = !in_fence;
                lines.push(line.to_string());
            } else if in_fence {
                lines.push(line.to_string());
            } else {
                let rewritten = self.rewrite_line(line, files);
                unresolved.extend(
                    ANY_ATTACH_TOKEN
                        .find_iter(&rewritten)
                        .map(|m| m.as_str().to_string()),
                );
                lines.push(rewritten);
            }
        }

        RewriteOutcome {
            text: lines.join("\n"),
            unresolved,
        }
    }

    fn rewrite_line(&self, line: &str, files: &[FileRef]) -> String {
        ATTACH_TOKEN
            .replace_all(line, |caps: &Captures| {
                let id = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .and_then(|m| m.as_str().parse::<u64>().ok());
                match id.and_then(|id| files.iter().find(|file| file.id == id)) {
                    Some(file) => self.markdown_for(file),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn sanitize_strips_directories_and_forbidden_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\a?b.txt"), "a_b.txt");
        assert_eq!(sanitize_filename("bad\u{0}name.png"), "bad_name.png");
        assert_eq!(sanitize_filename(".."), PLACEHOLDER_FILENAME);
        assert_eq!(sanitize_filename("   "), PLACEHOLDER_FILENAME);
        assert_eq!(sanitize_filename("dir/"), PLACEHOLDER_FILENAME);
    }

    #[test]
    fn extension_is_lowercased_or_unknown() {
        assert_eq!(file_extension("Photo.JPG"), "jpg");
        assert_eq!(file_extension("README"), "unknown");
        assert!(is_image_extension("WEBP"));
        assert!(!is_image_extension("pdf"));
    }

    #[test]
    fn relative_paths_resolve_against_the_root() {
        let root = Path::new("/srv/attachments");
        assert!(validate_path(&root.join("png/a.png"), root).is_ok());
        assert!(validate_path(&root.join("png/../../etc"), root).is_err());
        assert!(validate_path(Path::new("/etc/passwd"), root).is_err());
    }
}
