use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use fs2::FileExt;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub fn file_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn is_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

pub fn is_file(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

pub fn file_size(path: &Path) -> io::Result<u64> {
    Ok(fs::metadata(path)?.len())
}

pub fn remove_file(path: &Path) -> Result<(), String> {
    fs::remove_file(path).map_err(|err| format!("Error removing '{}': {err}", path.display()))
}

pub fn rename(from: &Path, to: &Path) -> Result<(), String> {
    fs::rename(from, to).map_err(|err| {
        format!(
            "Error renaming '{}' to '{}': {err}",
            from.display(),
            to.display()
        )
    })
}

pub fn move_to_trash(path: &Path) -> Result<(), String> {
    trash::delete(path)
        .map_err(|err| format!("Could not move '{}' to the trash: {err}", path.display()))
}

/// Deletes `path` and everything below it, deepest entries first.
///
/// `on_deleted` sees every entry that is actually gone, in deletion order. A
/// directory whose contents could not all be removed is left in place; only
/// the failing entries contribute to `errors`.
pub fn remove_recursively<F>(path: &Path, mut on_deleted: F, errors: &mut Vec<String>) -> bool
where
    F: FnMut(&Path, bool),
{
    let mut failed: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(path).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let at = err.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
                errors.push(format!("Error removing '{}': {err}", at.display()));
                failed.push(at);
                continue;
            }
        };
        let entry_path = entry.path();
        let is_dir = entry.file_type().is_dir();
        if is_dir && failed.iter().any(|bad| bad.starts_with(entry_path)) {
            continue;
        }
        let result = if is_dir {
            fs::remove_dir(entry_path)
        } else {
            fs::remove_file(entry_path)
        };
        match result {
            Ok(()) => on_deleted(entry_path, is_dir),
            Err(err) => {
                errors.push(format!("Error removing '{}': {err}", entry_path.display()));
                failed.push(entry_path.to_path_buf());
            }
        }
    }
    failed.is_empty()
}

/// True when another handle holds a lock that conflicts with `mode`.
pub fn is_file_locked(path: &Path, mode: LockMode) -> bool {
    if !is_file(path) {
        return false;
    }
    let Ok(file) = OpenOptions::new().read(true).open(path) else {
        return false;
    };
    let attempt = match mode {
        LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        LockMode::Shared => FileExt::try_lock_shared(&file),
    };
    match attempt {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(err) => err.kind() == fs2::lock_contended_error().kind(),
    }
}

pub fn set_mod_time(path: &Path, modtime: i64) -> io::Result<()> {
    filetime::set_file_mtime(path, FileTime::from_unix_time(modtime, 0))
}

pub fn mod_time(path: &Path) -> io::Result<i64> {
    let meta = fs::metadata(path)?;
    Ok(FileTime::from_last_modification_time(&meta).unix_seconds())
}

pub fn verify_file_unchanged(path: &Path, size: i64, modtime: i64) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    let on_disk = FileTime::from_last_modification_time(&meta).unix_seconds();
    i64::try_from(meta.len()).ok() == Some(size) && on_disk == modtime
}
