use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::propagator::SyncOptions;
use crate::sync::clash::platform_is_case_sensitive;
use crate::sync::journal::default_journal_path;
use crate::sync::vfs::{DEFAULT_VIRTUAL_FILE_SUFFIX, VfsMode};

const DEFAULT_LOCAL_DIR_NAME: &str = "SyncProp";

#[derive(Clone, Debug)]
pub struct PropagatorConfig {
    pub local_dir: PathBuf,
    pub journal_path: PathBuf,
    pub vfs_mode: VfsMode,
    pub vfs_suffix: String,
    pub options: SyncOptions,
    pub case_sensitive: bool,
}

impl PropagatorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let local_dir = std::env::var("SYNCPROP_LOCAL_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_LOCAL_DIR_NAME));
        let journal_path = match std::env::var("SYNCPROP_JOURNAL") {
            Ok(value) => expand_with_home(&value, &home),
            Err(_) => default_journal_path().context("no default journal location")?,
        };
        let vfs_mode = VfsMode::parse(&std::env::var("SYNCPROP_VFS").unwrap_or_default())
            .context("invalid SYNCPROP_VFS")?;
        let vfs_suffix = std::env::var("SYNCPROP_VFS_SUFFIX")
            .ok()
            .filter(|value| value.starts_with('.') && value.len() > 1)
            .unwrap_or_else(|| DEFAULT_VIRTUAL_FILE_SUFFIX.to_string());
        let options = SyncOptions {
            move_files_to_trash: read_bool_env("SYNCPROP_MOVE_TO_TRASH", false),
            delete_existing_files: read_bool_env("SYNCPROP_DELETE_EXISTING_FILE", false),
        };
        let case_sensitive = read_bool_env("SYNCPROP_CASE_SENSITIVE", platform_is_case_sensitive());

        Ok(Self {
            local_dir,
            journal_path,
            vfs_mode,
            vfs_suffix,
            options,
            case_sensitive,
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| parse_bool(&value))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
