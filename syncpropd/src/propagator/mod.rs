use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use syncprop_core::{FileRecord, Instruction, JobStatus, MetadataPhase, SyncItem};
use tokio::sync::mpsc;

use crate::sync::clash::NameClashDetector;
use crate::sync::conflict::{conflict_file_name, now_unix};
use crate::sync::filesystem::{self, LockMode};
use crate::sync::journal::SyncJournal;
use crate::sync::vfs::{ConvertToPlaceholderResult, Vfs};

mod batch;
mod mkdir;
mod remove;
mod rename;

pub use batch::{BatchReport, apply_batch};
pub use mkdir::LocalMkdirJob;
pub use remove::LocalRemoveJob;
pub use rename::LocalRenameJob;

pub(crate) const ABORTED: &str = "sync aborted";

// Runs before any filesystem call: an empty, absolute or `..` path would
// resolve to the sync root itself or to something outside it.
pub(crate) fn check_item_paths(item: &SyncItem) -> Result<(), JobStatus> {
    item.validate_paths().map_err(|err| {
        JobStatus::NormalError(format!("Refusing to propagate '{}': {err}", item.file))
    })
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub move_files_to_trash: bool,
    pub delete_existing_files: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagatorEvent {
    Progress { file: String, bytes: u64 },
    /// Emitted before the engine changes a path so file watchers can ignore the echo.
    TouchedFile(PathBuf),
    SeenLockedFile { path: PathBuf, mode: LockMode },
    ItemCompleted { file: String, status: JobStatus },
}

pub enum LocalJob {
    Remove(LocalRemoveJob),
    Mkdir(LocalMkdirJob),
    Rename(LocalRenameJob),
}

impl LocalJob {
    pub fn for_item(item: SyncItem, options: &SyncOptions) -> Self {
        match item.instruction {
            Instruction::Remove => LocalJob::Remove(LocalRemoveJob::new(item)),
            Instruction::Rename => LocalJob::Rename(LocalRenameJob::new(item)),
            Instruction::Mkdir | Instruction::Conflict => {
                let mut job = LocalMkdirJob::new(item);
                job.set_delete_existing_file(options.delete_existing_files);
                LocalJob::Mkdir(job)
            }
        }
    }

    pub fn item(&self) -> &SyncItem {
        match self {
            LocalJob::Remove(job) => job.item(),
            LocalJob::Mkdir(job) => job.item(),
            LocalJob::Rename(job) => job.item(),
        }
    }

    pub async fn run(&self, propagator: &Propagator) -> JobStatus {
        let status = {
            let _gate = propagator.gate.lock().await;
            match self {
                LocalJob::Remove(job) => job.start(propagator).await,
                LocalJob::Mkdir(job) => job.start(propagator).await,
                LocalJob::Rename(job) => job.start(propagator).await,
            }
        };
        propagator.emit(PropagatorEvent::ItemCompleted {
            file: self.item().file.clone(),
            status: status.clone(),
        });
        status
    }
}

pub struct Propagator {
    local_path: PathBuf,
    journal: Arc<SyncJournal>,
    vfs: Arc<Vfs>,
    options: SyncOptions,
    clash_detector: NameClashDetector,
    abort_requested: AtomicBool,
    renamed_directories: Mutex<BTreeMap<String, String>>,
    events: mpsc::UnboundedSender<PropagatorEvent>,
    // Held by a job from its first filesystem change until its journal update is done.
    gate: tokio::sync::Mutex<()>,
}

impl Propagator {
    pub fn new(
        local_path: impl Into<PathBuf>,
        journal: Arc<SyncJournal>,
        vfs: Arc<Vfs>,
        options: SyncOptions,
        case_sensitive: bool,
    ) -> (Self, mpsc::UnboundedReceiver<PropagatorEvent>) {
        let local_path = local_path.into();
        let (events, rx) = mpsc::unbounded_channel();
        let propagator = Self {
            clash_detector: NameClashDetector::new(local_path.clone(), case_sensitive),
            local_path,
            journal,
            vfs,
            options,
            abort_requested: AtomicBool::new(false),
            renamed_directories: Mutex::new(BTreeMap::new()),
            events,
            gate: tokio::sync::Mutex::new(()),
        };
        (propagator, rx)
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn journal(&self) -> &SyncJournal {
        &self.journal
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub async fn run(&self, item: SyncItem) -> JobStatus {
        LocalJob::for_item(item, &self.options).run(self).await
    }

    pub fn abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    pub fn full_local_path(&self, relative: &str) -> PathBuf {
        self.local_path.join(relative)
    }

    pub fn local_file_name_clash(&self, relative: &str) -> Option<PathBuf> {
        self.clash_detector.local_file_name_clash(relative)
    }

    pub fn record_renamed_directory(&self, from: &str, to: &str) {
        self.renamed_directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(from.to_string(), to.to_string());
    }

    pub fn renamed_directories(&self) -> BTreeMap<String, String> {
        self.renamed_directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Maps `path` to where it lives now if one of its parents was renamed earlier in this run.
    pub fn adjust_renamed_path(&self, path: &str) -> String {
        let renamed = self
            .renamed_directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut end = path.len();
        while let Some(slash) = path[..end].rfind('/') {
            if slash == 0 {
                break;
            }
            if let Some(target) = renamed.get(&path[..slash]) {
                return format!("{target}{}", &path[slash..]);
            }
            end = slash;
        }
        path.to_string()
    }

    fn emit(&self, event: PropagatorEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    pub fn report_progress(&self, item: &SyncItem, bytes: u64) {
        self.emit(PropagatorEvent::Progress {
            file: item.file.clone(),
            bytes,
        });
    }

    pub fn touched_file(&self, path: &Path) {
        self.emit(PropagatorEvent::TouchedFile(path.to_path_buf()));
    }

    pub fn seen_locked_file(&self, path: &Path, mode: LockMode) {
        self.emit(PropagatorEvent::SeenLockedFile {
            path: path.to_path_buf(),
            mode,
        });
    }

    pub async fn update_metadata(
        &self,
        item: &SyncItem,
        phase: MetadataPhase,
    ) -> Result<ConvertToPlaceholderResult, String> {
        let fs_path = self.full_local_path(item.destination());
        if !filesystem::file_exists(&fs_path) {
            return Err(format!("File {} does not exist", fs_path.display()));
        }
        match self.vfs.update_metadata(item, &fs_path) {
            Ok(ConvertToPlaceholderResult::Locked) => {
                return Ok(ConvertToPlaceholderResult::Locked);
            }
            Ok(ConvertToPlaceholderResult::Ok) => {}
            Err(err) => return Err(err.to_string()),
        }
        self.journal
            .set_record(&FileRecord::from_item(item, phase))
            .await
            .map_err(|err| err.to_string())?;
        Ok(ConvertToPlaceholderResult::Ok)
    }

    /// Second half of the directory write started by Mkdir or a directory
    /// rename: stores the real etag once everything below has been propagated.
    pub async fn finalize_directory(&self, item: &SyncItem) -> JobStatus {
        let _gate = self.gate.lock().await;
        match self.update_metadata(item, MetadataPhase::Final).await {
            Ok(ConvertToPlaceholderResult::Ok) => {}
            Ok(ConvertToPlaceholderResult::Locked) => {
                return JobStatus::SoftError(format!(
                    "The file {} is currently in use",
                    item.destination()
                ));
            }
            Err(err) => return JobStatus::FatalError(format!("Error updating metadata: {err}")),
        }
        if let Err(err) = self.journal.commit("directory metadata").await {
            return JobStatus::FatalError(format!("Error updating metadata: {err}"));
        }
        JobStatus::Success
    }

    /// Moves whatever occupies `item.file` aside to a conflicted-copy name.
    pub async fn create_conflict(&self, item: &SyncItem) -> Result<String, String> {
        let original = self.full_local_path(&item.file);
        let modtime = filesystem::mod_time(&original)
            .map_err(|err| format!("Could not read '{}': {err}", original.display()))?;
        let conflict = conflict_file_name(&item.file, modtime);
        let conflict_path = self.full_local_path(&conflict);

        self.touched_file(&original);
        self.touched_file(&conflict_path);
        filesystem::rename(&original, &conflict_path)?;

        self.journal
            .record_conflict(&item.file, &conflict, now_unix(), "local file replaced by directory")
            .await
            .map_err(|err| err.to_string())?;
        tracing::info!(
            target: "sync.propagator",
            file = %item.file,
            conflict = %conflict,
            "kept conflicted copy"
        );
        Ok(conflict)
    }
}

#[cfg(test)]
#[path = "propagator_tests.rs"]
mod tests;
