use std::path::Path;

use syncprop_core::{JobStatus, SyncItem, is_descendant_of};

use super::{ABORTED, Propagator, check_item_paths};
use crate::sync::filesystem;

const TARGET: &str = "sync.propagator.localremove";

pub struct LocalRemoveJob {
    item: SyncItem,
}

impl LocalRemoveJob {
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

        let filename = propagator.full_local_path(&self.item.file);
        tracing::debug!(target: TARGET, path = %filename.display(), "local remove");

        if let Some(clash) = propagator.local_file_name_clash(&self.item.file) {
            return JobStatus::NormalError(format!(
                "Could not remove {} because of a local file name clash with {}!",
                filename.display(),
                clash.display()
            ));
        }

        if filesystem::file_exists(&filename) {
            propagator.touched_file(&filename);
        }
        if propagator.options().move_files_to_trash {
            if filesystem::file_exists(&filename)
                && let Err(err) = filesystem::move_to_trash(&filename)
            {
                return JobStatus::NormalError(err);
            }
        } else if self.item.is_directory() {
            if filesystem::is_dir(&filename)
                && let Err(err) = self.remove_recursively(propagator, &filename).await
            {
                return err;
            }
        } else if filesystem::file_exists(&filename)
            && let Err(err) = filesystem::remove_file(&filename)
        {
            return JobStatus::NormalError(err);
        }

        propagator.report_progress(&self.item, 0);
        if let Err(err) = propagator
            .journal()
            .delete_record(self.item.journal_key(), self.item.is_directory())
            .await
        {
            return JobStatus::FatalError(format!("Error updating metadata: {err}"));
        }
        if let Err(err) = propagator.journal().commit("Local remove").await {
            return JobStatus::FatalError(format!("Error updating metadata: {err}"));
        }
        JobStatus::Success
    }

    // On failure the journal entries of everything that did get deleted are
    // dropped here; on success the caller removes the whole subtree at once.
    async fn remove_recursively(
        &self,
        propagator: &Propagator,
        absolute: &Path,
    ) -> Result<(), JobStatus> {
        let mut errors = Vec::new();
        let mut deleted: Vec<(String, bool)> = Vec::new();
        let local_path = propagator.local_path();
        let success = filesystem::remove_recursively(
            absolute,
            |path, is_dir| {
                if let Ok(relative) = path.strip_prefix(local_path) {
                    deleted.push((relative_key(relative), is_dir));
                }
            },
            &mut errors,
        );
        if success {
            return Ok(());
        }

        // Newest first: a deleted directory comes before its former contents,
        // which its recursive journal delete already covers.
        let mut deleted_dir: Option<String> = None;
        for (path, is_dir) in deleted.iter().rev() {
            if let Some(dir) = &deleted_dir
                && is_descendant_of(path, dir)
            {
                continue;
            }
            if *is_dir {
                deleted_dir = Some(path.clone());
            }
            if let Err(err) = propagator.journal().delete_record(path, *is_dir).await {
                return Err(JobStatus::FatalError(format!(
                    "Error updating metadata: {err}"
                )));
            }
        }
        if let Err(err) = propagator.journal().commit("Local remove").await {
            return Err(JobStatus::FatalError(format!(
                "Error updating metadata: {err}"
            )));
        }

        let message = errors.join(", ");
        tracing::warn!(target: TARGET, file = %self.item.file, error = %message, "partial removal");
        Err(JobStatus::NormalError(message))
    }
}

fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
