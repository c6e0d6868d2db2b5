use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use syncprop_core::{PinState, SyncItem};

use super::{ConvertToPlaceholderResult, VfsError, VfsSetupParams};
use crate::sync::filesystem;

pub const DEFAULT_VIRTUAL_FILE_SUFFIX: &str = ".syncprop";

// A dehydrated placeholder is exactly this one byte.
const PLACEHOLDER_CONTENT: &[u8] = b" ";

pub struct SuffixVfs {
    suffix: String,
}

impl SuffixVfs {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub(super) async fn start(&self, params: &VfsSetupParams) -> Result<(), VfsError> {
        // Suffixed records that are not virtual are real files synced before
        // placeholders were enabled; path matching would mistake them for placeholders.
        let mut to_wipe = Vec::new();
        params
            .journal
            .get_files_below_path("", |record| {
                if !record.is_virtual_file() && record.path.ends_with(&self.suffix) {
                    to_wipe.push(record.path.clone());
                }
            })
            .await?;
        for path in &to_wipe {
            params.journal.delete_record(path, false).await?;
        }
        if !to_wipe.is_empty() {
            tracing::info!(
                target: "sync.vfs.suffix",
                count = to_wipe.len(),
                "dropped non-virtual records carrying the placeholder suffix"
            );
        }
        Ok(())
    }

    pub(super) fn update_metadata(
        &self,
        item: &SyncItem,
        file_path: &Path,
    ) -> Result<ConvertToPlaceholderResult, VfsError> {
        if item.is_directory() {
            return Ok(ConvertToPlaceholderResult::Ok);
        }
        filesystem::set_mod_time(file_path, item.modtime).map_err(|source| VfsError::Io {
            path: file_path.to_path_buf(),
            source,
        })?;
        Ok(ConvertToPlaceholderResult::Ok)
    }

    pub(super) fn create_placeholder(
        &self,
        params: &VfsSetupParams,
        item: &SyncItem,
    ) -> Result<(), VfsError> {
        if !item.file.ends_with(&self.suffix) {
            return Err(VfsError::Placeholder(format!(
                "placeholder name '{}' does not end with '{}'",
                item.file, self.suffix
            )));
        }
        let path = params.filesystem_path.join(&item.file);

        if let Ok(size) = filesystem::file_size(&path)
            && size > 1
            && !filesystem::verify_file_unchanged(&path, item.size, item.modtime)
        {
            return Err(VfsError::Placeholder(
                "Cannot create a placeholder because a file with the placeholder name already exist"
                    .to_string(),
            ));
        }

        let io_err = |source| VfsError::Io {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(io_err)?;
        file.write_all(PLACEHOLDER_CONTENT).map_err(io_err)?;
        drop(file);
        filesystem::set_mod_time(&path, item.modtime).map_err(io_err)?;
        tracing::debug!(target: "sync.vfs.suffix", path = %item.file, "placeholder written");
        Ok(())
    }

    pub(super) async fn dehydrate_placeholder(
        &self,
        params: &VfsSetupParams,
        item: &SyncItem,
    ) -> Result<(), VfsError> {
        let mut virtual_item = item.clone();
        virtual_item.file = item.rename_target.clone();
        self.create_placeholder(params, &virtual_item)?;

        // The names coincide when "foo.syncprop" is dehydrated in place.
        let in_place = item.file == item.rename_target;
        if !in_place {
            let original = params.filesystem_path.join(&item.file);
            if let Err(err) = fs::remove_file(&original) {
                tracing::warn!(
                    target: "sync.vfs.suffix",
                    path = %original.display(),
                    error = %err,
                    "could not remove hydrated file after dehydration"
                );
            }

            let journal = &params.journal;
            if let Some(pin) = journal.raw_pin_state(&item.file).await?
                && pin != PinState::Inherited
            {
                journal.set_pin_state(&item.rename_target, pin).await?;
                journal.set_pin_state(&item.file, PinState::Inherited).await?;
            }
        }

        let journal = &params.journal;
        if journal.effective_pin_state(&item.rename_target).await? == Some(PinState::AlwaysLocal) {
            journal
                .set_pin_state(&item.rename_target, PinState::AlwaysLocal.for_dehydrated())
                .await?;
        }
        Ok(())
    }

    pub(super) fn is_dehydrated_placeholder(&self, file_path: &Path) -> bool {
        let Some(name) = file_path.to_str() else {
            return false;
        };
        if !name.ends_with(&self.suffix) {
            return false;
        }
        matches!(filesystem::file_size(file_path), Ok(1))
    }

    pub(super) fn underlying_file_name<'a>(&self, file_name: &'a str) -> &'a str {
        file_name.strip_suffix(&self.suffix).unwrap_or(file_name)
    }
}

#[cfg(test)]
#[path = "suffix_tests.rs"]
mod tests;
