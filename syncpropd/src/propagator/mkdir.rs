use std::fs;

use syncprop_core::{Instruction, JobStatus, MetadataPhase, SyncItem};

use super::{ABORTED, Propagator, check_item_paths};
use crate::sync::filesystem;
use crate::sync::vfs::ConvertToPlaceholderResult;

const TARGET: &str = "sync.propagator.localmkdir";

pub struct LocalMkdirJob {
    item: SyncItem,
    delete_existing_file: bool,
}

impl LocalMkdirJob {
    pub fn new(item: SyncItem) -> Self {
        Self {
            item,
            delete_existing_file: false,
        }
    }

    pub fn item(&self) -> &SyncItem {
        &self.item
    }

    /// Set when the item used to be a file and turned into a directory.
    pub fn set_delete_existing_file(&mut self, enabled: bool) {
        self.delete_existing_file = enabled;
    }

    pub async fn start(&self, propagator: &Propagator) -> JobStatus {
        if let Err(status) = check_item_paths(&self.item) {
            return status;
        }
        if propagator.is_abort_requested() {
            return JobStatus::SoftError(ABORTED.to_string());
        }
        // Conflict items are only resolved here when the remote side became a directory.
        if !self.item.is_directory() {
            return JobStatus::NormalError(format!(
                "Can not create local folder for {}: the item is not a directory",
                self.item.file
            ));
        }

        let new_dir = propagator.full_local_path(&self.item.file);

        // A file occupying the name has to go before the directory can exist.
        if filesystem::is_file(&new_dir) {
            if self.delete_existing_file {
                if let Err(err) = filesystem::remove_file(&new_dir) {
                    return JobStatus::NormalError(format!(
                        "could not delete file {}, error: {err}",
                        new_dir.display()
                    ));
                }
            } else if self.item.instruction == Instruction::Conflict
                && let Err(err) = propagator.create_conflict(&self.item).await
            {
                return JobStatus::SoftError(err);
            }
        }

        if let Some(clash) = propagator.local_file_name_clash(&self.item.file) {
            tracing::warn!(
                target: TARGET,
                file = %self.item.file,
                "new folder to create locally already exists with different case"
            );
            return JobStatus::NormalError(format!(
                "Can not create local folder {} because of a local file name clash with {}",
                new_dir.display(),
                clash.display()
            ));
        }

        if propagator.is_abort_requested() {
            return JobStatus::SoftError(ABORTED.to_string());
        }
        propagator.touched_file(&new_dir);
        if let Err(err) = fs::create_dir_all(&new_dir) {
            return JobStatus::NormalError(format!(
                "could not create folder {}: {err}",
                new_dir.display()
            ));
        }

        // Recorded now so the journal knows the folder exists even if the run
        // stops before its contents are done; the real etag follows later.
        match propagator
            .update_metadata(&self.item, MetadataPhase::Provisional)
            .await
        {
            Ok(ConvertToPlaceholderResult::Ok) => {}
            Ok(ConvertToPlaceholderResult::Locked) => {
                return JobStatus::SoftError(format!(
                    "The file {} is currently in use",
                    self.item.file
                ));
            }
            Err(err) => {
                return JobStatus::FatalError(format!("Error updating metadata: {err}"));
            }
        }
        if let Err(err) = propagator.journal().commit("localMkdir").await {
            return JobStatus::FatalError(format!("Error updating metadata: {err}"));
        }

        tracing::debug!(target: TARGET, path = %new_dir.display(), "folder created");
        if self.item.instruction == Instruction::Conflict {
            JobStatus::Conflict
        } else {
            JobStatus::Success
        }
    }
}
