use std::fs;
use std::path::PathBuf;

use syncprop_core::{file_name, parent_path};
use unicode_normalization::UnicodeNormalization;

pub fn platform_is_case_sensitive() -> bool {
    !cfg!(any(target_os = "macos", target_os = "windows"))
}

#[derive(Debug, Clone)]
pub struct NameClashDetector {
    root: PathBuf,
    case_sensitive: bool,
}

impl NameClashDetector {
    pub fn new(root: impl Into<PathBuf>, case_sensitive: bool) -> Self {
        Self {
            root: root.into(),
            case_sensitive,
        }
    }

    /// Returns an existing entry, other than `relative` itself, that the local
    /// filesystem would treat as the same name.
    pub fn local_file_name_clash(&self, relative: &str) -> Option<PathBuf> {
        let parent = parent_path(relative)?;
        let name = file_name(relative);
        if name.is_empty() {
            return None;
        }
        let parent_dir = if parent.is_empty() {
            self.root.clone()
        } else {
            self.root.join(parent)
        };
        let wanted = self.comparison_key(name);

        let mut clashes: Vec<PathBuf> = fs::read_dir(&parent_dir)
            .ok()?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let candidate = entry.file_name().into_string().ok()?;
                (candidate != name && self.comparison_key(&candidate) == wanted)
                    .then(|| entry.path())
            })
            .collect();
        clashes.sort();
        clashes.into_iter().next()
    }

    fn comparison_key(&self, name: &str) -> String {
        let normalized: String = name.nfc().collect();
        if self.case_sensitive {
            normalized
        } else {
            normalized.chars().flat_map(char::to_lowercase).collect()
        }
    }
}
