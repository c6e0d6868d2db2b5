use syncprop_core::{Instruction, JobStatus, SyncItem};

use super::{LocalJob, Propagator};

#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<(String, JobStatus)>,
    /// Set when a fatal error stopped the batch before every item ran.
    pub stopped_early: bool,
}

impl BatchReport {
    pub fn error_count(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, status)| status.is_error())
            .count()
    }
}

/// Runs `items` in the given order, then writes the final metadata of every
/// directory created or moved along the way, innermost first.
pub async fn apply_batch(propagator: &Propagator, items: Vec<SyncItem>) -> BatchReport {
    let mut report = BatchReport::default();
    let mut directories = Vec::new();

    for item in items {
        let job = LocalJob::for_item(item, propagator.options());
        let status = job.run(propagator).await;
        let item = job.item();
        let fatal = status.aborts_sync();
        if !status.is_error() && item.is_directory() && item.instruction != Instruction::Remove {
            directories.push(item.clone());
        }
        report.results.push((item.file.clone(), status));
        if fatal {
            tracing::error!(target: "sync.propagator", file = %item.file, "fatal error, stopping batch");
            report.stopped_early = true;
            return report;
        }
    }

    for item in directories.iter().rev() {
        let status = propagator.finalize_directory(item).await;
        if status.is_error() {
            let fatal = status.aborts_sync();
            report.results.push((item.destination().to_string(), status));
            if fatal {
                report.stopped_early = true;
                return report;
            }
        }
    }
    report
}
