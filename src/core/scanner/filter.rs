//! Include/exclude filtering for scanned entries.
//!
//! Two ordered glob lists decide membership: a file must match some
//! include pattern (an empty include list admits everything) and no
//! exclude pattern. Excludes always win. On top of the patterns sits the
//! image-extension allow-list and the hidden-file rule.

use super::ImageFormat;
use crate::error::ScanError;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Compiled filter applied to every walked file.
#[derive(Clone)]
pub struct PathFilter {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
    extensions: HashSet<String>,
    include_hidden: bool,
}

impl PathFilter {
    /// Filter with the default extension set and no patterns.
    pub fn new() -> Self {
        let extensions = [
            "jpg", "jpeg", "png", "webp", "heic", "heif", "gif", "bmp", "tif", "tiff", "cr2",
            "cr3", "nef", "arw", "dng", "orf", "rw2", "raf",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            extensions,
            include_hidden: false,
        }
    }

    /// Compile include and exclude glob lists. Order within each list is
    /// preserved but irrelevant to the outcome; excludes override.
    pub fn with_patterns(
        mut self,
        includes: &[String],
        excludes: &[String],
    ) -> Result<Self, ScanError> {
        self.includes = compile_globs(includes)?;
        self.excludes = compile_globs(excludes)?;
        Ok(self)
    }

    pub fn with_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Should this file enter the pipeline?
    pub fn should_include(&self, path: &Path) -> bool {
        if !self.include_hidden {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    return false;
                }
            }
        }

        let has_image_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false);
        if !has_image_extension {
            return false;
        }

        let full = path.to_string_lossy();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let included = self.includes.is_empty()
            || self
                .includes
                .iter()
                .any(|re| re.is_match(&full) || re.is_match(&name));
        if !included {
            return false;
        }

        !self
            .excludes
            .iter()
            .any(|re| re.is_match(&full) || re.is_match(&name))
    }

    pub fn format_of(&self, path: &Path) -> ImageFormat {
        ImageFormat::from_path(path)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Regex>, ScanError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(&glob_to_regex(pattern)).map_err(|e| ScanError::BadPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Translate a glob into an anchored regex: `**` crosses separators,
/// `*` and `?` do not.
fn glob_to_regex(glob: &str) -> String {
    let mut regex = String::with_capacity(glob.len() * 2 + 2);
    regex.push('^');

    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex.push_str(".*");
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '{' | '}' | '[' | ']' | '\\' => {
                regex.push('\\');
                regex.push(c);
            }
            other => regex.push(other),
        }
    }

    regex.push('$');
    regex
}
