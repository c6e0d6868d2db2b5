use std::fmt;

/// Terminal outcome of one local job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    /// Done, and a conflicted copy of the previous local content was kept.
    Conflict,
    /// Contended or transient; safe to retry on a later pass.
    SoftError(String),
    /// This item failed; the rest of the sync continues.
    NormalError(String),
    /// The journal may disagree with the disk; the whole run must stop.
    FatalError(String),
}

impl JobStatus {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            JobStatus::SoftError(_) | JobStatus::NormalError(_) | JobStatus::FatalError(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobStatus::SoftError(_))
    }

    pub fn aborts_sync(&self) -> bool {
        matches!(self, JobStatus::FatalError(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            JobStatus::SoftError(msg) | JobStatus::NormalError(msg) | JobStatus::FatalError(msg) => {
                Some(msg)
            }
            JobStatus::Success | JobStatus::Conflict => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => write!(f, "success"),
            JobStatus::Conflict => write!(f, "conflict"),
            JobStatus::SoftError(msg) => write!(f, "soft error: {msg}"),
            JobStatus::NormalError(msg) => write!(f, "error: {msg}"),
            JobStatus::FatalError(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}
