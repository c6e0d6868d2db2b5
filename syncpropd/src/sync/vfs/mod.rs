use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use syncprop_core::{Availability, PinState, SyncItem};
use thiserror::Error;
use tokio::sync::watch;

use super::journal::{JournalError, SyncJournal};

mod suffix;

pub use suffix::{DEFAULT_VIRTUAL_FILE_SUFFIX, SuffixVfs};

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("virtual files are not enabled for this folder")]
    Unsupported,
    #[error("virtual file backend used before start")]
    NotStarted,
    #[error("virtual file backend already started")]
    AlreadyStarted,
    #[error("unknown virtual file mode: {0}")]
    UnknownMode(String),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0}")]
    Placeholder(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsMode {
    Off,
    WithSuffix,
}

impl VfsMode {
    pub fn parse(value: &str) -> Result<Self, VfsError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Ok(VfsMode::Off),
            "suffix" => Ok(VfsMode::WithSuffix),
            other => Err(VfsError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertToPlaceholderResult {
    Ok,
    /// The file is held open elsewhere; try again on a later pass.
    Locked,
}

#[derive(Clone)]
pub struct VfsSetupParams {
    pub filesystem_path: PathBuf,
    pub journal: Arc<SyncJournal>,
}

enum Backend {
    Off,
    Suffix(SuffixVfs),
}

pub struct Vfs {
    backend: Backend,
    params: OnceLock<VfsSetupParams>,
    started: watch::Sender<bool>,
}

impl Vfs {
    pub fn off() -> Self {
        Self::with_backend(Backend::Off)
    }

    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self::with_backend(Backend::Suffix(SuffixVfs::new(suffix)))
    }

    pub fn for_mode(mode: VfsMode, suffix: &str) -> Self {
        match mode {
            VfsMode::Off => Self::off(),
            VfsMode::WithSuffix => Self::with_suffix(suffix),
        }
    }

    fn with_backend(backend: Backend) -> Self {
        let (started, _) = watch::channel(false);
        Self {
            backend,
            params: OnceLock::new(),
            started,
        }
    }

    pub fn mode(&self) -> VfsMode {
        match &self.backend {
            Backend::Off => VfsMode::Off,
            Backend::Suffix(_) => VfsMode::WithSuffix,
        }
    }

    pub fn file_suffix(&self) -> Option<&str> {
        match &self.backend {
            Backend::Off => None,
            Backend::Suffix(suffix) => Some(suffix.suffix()),
        }
    }

    fn params(&self) -> Result<&VfsSetupParams, VfsError> {
        self.params.get().ok_or(VfsError::NotStarted)
    }

    /// Flips to `true` once `start` finished its backend-specific preparation.
    pub fn started(&self) -> watch::Receiver<bool> {
        self.started.subscribe()
    }

    pub async fn start(&self, params: VfsSetupParams) -> Result<(), VfsError> {
        self.params
            .set(params)
            .map_err(|_| VfsError::AlreadyStarted)?;
        let params = self.params()?;
        if let Backend::Suffix(suffix) = &self.backend {
            suffix.start(params).await?;
        }
        tracing::info!(
            target: "sync.vfs",
            mode = ?self.mode(),
            root = %params.filesystem_path.display(),
            "virtual file backend started"
        );
        self.started.send_replace(true);
        Ok(())
    }

    pub fn stop(&self) {
        self.started.send_replace(false);
    }

    pub fn unregister_folder(&self) {
        tracing::debug!(target: "sync.vfs", mode = ?self.mode(), "folder unregistered");
    }

    pub fn is_hydrating(&self) -> bool {
        false
    }

    pub async fn availability(&self, folder_path: &str) -> Result<Availability, VfsError> {
        match &self.backend {
            Backend::Off => Ok(Availability::FullyLocal),
            Backend::Suffix(_) => Ok(self.params()?.journal.availability(folder_path).await?),
        }
    }

    pub fn update_metadata(
        &self,
        item: &SyncItem,
        file_path: &Path,
    ) -> Result<ConvertToPlaceholderResult, VfsError> {
        match &self.backend {
            Backend::Off => Ok(ConvertToPlaceholderResult::Ok),
            Backend::Suffix(suffix) => suffix.update_metadata(item, file_path),
        }
    }

    pub fn create_placeholder(&self, item: &SyncItem) -> Result<(), VfsError> {
        match &self.backend {
            Backend::Off => Err(VfsError::Unsupported),
            Backend::Suffix(suffix) => suffix.create_placeholder(self.params()?, item),
        }
    }

    pub async fn dehydrate_placeholder(&self, item: &SyncItem) -> Result<(), VfsError> {
        match &self.backend {
            Backend::Off => Err(VfsError::Unsupported),
            Backend::Suffix(suffix) => suffix.dehydrate_placeholder(self.params()?, item).await,
        }
    }

    pub fn is_dehydrated_placeholder(&self, file_path: &Path) -> bool {
        match &self.backend {
            Backend::Off => false,
            Backend::Suffix(suffix) => suffix.is_dehydrated_placeholder(file_path),
        }
    }

    pub fn underlying_file_name<'a>(&self, file_name: &'a str) -> &'a str {
        match &self.backend {
            Backend::Off => file_name,
            Backend::Suffix(suffix) => suffix.underlying_file_name(file_name),
        }
    }

    pub async fn pin_state(&self, path: &str) -> Result<Option<PinState>, VfsError> {
        match &self.backend {
            Backend::Off => Ok(Some(PinState::AlwaysLocal)),
            Backend::Suffix(_) => Ok(self.params()?.journal.effective_pin_state(path).await?),
        }
    }

    pub async fn set_pin_state(&self, path: &str, state: PinState) -> Result<bool, VfsError> {
        match &self.backend {
            Backend::Off => Ok(true),
            Backend::Suffix(_) => {
                self.params()?.journal.set_pin_state(path, state).await?;
                Ok(true)
            }
        }
    }
}
