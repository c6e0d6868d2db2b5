use syncprop_core::{JobStatus, MetadataPhase, PinState, SyncItem, eq_ignore_case};

use super::{ABORTED, Propagator, check_item_paths};
use crate::sync::filesystem::{self, LockMode};
use crate::sync::vfs::ConvertToPlaceholderResult;

const TARGET: &str = "sync.propagator.localrename";

pub struct LocalRenameJob {
    item: SyncItem,
}

impl LocalRenameJob {
    pub fn new(item: SyncItem) -> Self {
        Self { item }
    }

    pub fn item(&self) -> &SyncItem {
        &self.item
    }

    pub async fn start(&self, propagator: &Propagator) -> JobStatus {
        if let Err(status) = check_item_paths(&self.item) {
            return status;
        }
        if propagator.is_abort_requested() {
            return JobStatus::SoftError(ABORTED.to_string());
        }
        let item = &self.item;
        if item.rename_target.is_empty() {
            return JobStatus::NormalError(format!("Rename of {} has no target", item.file));
        }
        let existing_file = propagator.full_local_path(&propagator.adjust_renamed_path(&item.file));
        let target_file = propagator.full_local_path(&item.rename_target);

        // Entries below an already moved directory arrive with file == rename_target.
        if item.file != item.rename_target {
            propagator.report_progress(item, 0);
            tracing::debug!(
                target: TARGET,
                from = %existing_file.display(),
                to = %target_file.display(),
                "move"
            );

            // Renaming A.txt to a.txt clashes with itself, so only other renames are checked.
            if !eq_ignore_case(&item.file, &item.rename_target)
                && propagator.local_file_name_clash(&item.rename_target).is_some()
            {
                return JobStatus::NormalError(format!(
                    "File {} can not be renamed to {} because of a local file name clash",
                    item.file, item.rename_target
                ));
            }
            if filesystem::is_file_locked(&existing_file, LockMode::Exclusive) {
                propagator.seen_locked_file(&existing_file, LockMode::Exclusive);
                return JobStatus::SoftError(format!(
                    "Could not rename {} to {}, the file is currently in use",
                    existing_file.display(),
                    target_file.display()
                ));
            }
            if propagator.is_abort_requested() {
                return JobStatus::SoftError(ABORTED.to_string());
            }
            propagator.touched_file(&existing_file);
            propagator.touched_file(&target_file);
            if let Err(err) = filesystem::rename(&existing_file, &target_file) {
                return JobStatus::NormalError(err);
            }
        }

        // The move is done; abort is no longer honoured from here on.
        let journal = propagator.journal();
        let old_record = match journal.get_record(item.journal_key()).await {
            Ok(record) => record,
            Err(err) => return JobStatus::FatalError(format!("Error updating metadata: {err}")),
        };
        if let Err(err) = journal.delete_record(item.journal_key(), false).await {
            return JobStatus::FatalError(format!("Error updating metadata: {err}"));
        }

        let vfs = propagator.vfs();
        let pin_state = match vfs.pin_state(item.journal_key()).await {
            Ok(pin) => pin,
            Err(err) => return JobStatus::FatalError(format!("Error reading pin state: {err}")),
        };
        if let Err(err) = vfs.set_pin_state(item.journal_key(), PinState::Inherited).await {
            return JobStatus::FatalError(format!("Error resetting pin state: {err}"));
        }

        if item.is_directory() {
            // Directory metadata is written once its contents are done.
            propagator.record_renamed_directory(&item.file, &item.rename_target);
            if let Err(err) = journal
                .adjust_selective_sync(&item.file, &item.rename_target)
                .await
            {
                tracing::error!(target: TARGET, error = %err, "could not adjust selective sync");
                return JobStatus::FatalError("Failed to rename file".to_string());
            }
        } else {
            let mut new_item = item.clone();
            if let Some(old) = &old_record {
                new_item.checksum_header = old.checksum_header.clone();
            }
            match propagator
                .update_metadata(&new_item, MetadataPhase::Final)
                .await
            {
                Ok(ConvertToPlaceholderResult::Ok) => {}
                Ok(ConvertToPlaceholderResult::Locked) => {
                    return JobStatus::SoftError(format!(
                        "The file {} is currently in use",
                        new_item.destination()
                    ));
                }
                Err(err) => {
                    return JobStatus::FatalError(format!("Error updating metadata: {err}"));
                }
            }
        }

        if let Some(pin) = pin_state
            && pin != PinState::Inherited
            && !matches!(vfs.set_pin_state(&item.rename_target, pin).await, Ok(true))
        {
            return JobStatus::NormalError("Error setting pin state".to_string());
        }

        // The target may also inherit AlwaysLocal from its new parent.
        if vfs.is_dehydrated_placeholder(&target_file) {
            match vfs.pin_state(&item.rename_target).await {
                Ok(Some(PinState::AlwaysLocal)) => {
                    let downgraded = PinState::AlwaysLocal.for_dehydrated();
                    if !matches!(vfs.set_pin_state(&item.rename_target, downgraded).await, Ok(true)) {
                        return JobStatus::NormalError("Error setting pin state".to_string());
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    return JobStatus::FatalError(format!("Error reading pin state: {err}"));
                }
            }
        }

        if let Err(err) = journal.commit("localRename").await {
            return JobStatus::FatalError(format!("Error updating metadata: {err}"));
        }
        JobStatus::Success
    }
}
