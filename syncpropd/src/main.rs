use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use syncprop_core::SyncItem;
use syncpropd::config::PropagatorConfig;
use syncpropd::propagator::{Propagator, PropagatorEvent, apply_batch};
use syncpropd::sync::journal::SyncJournal;
use syncpropd::sync::vfs::{Vfs, VfsSetupParams};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Apply(PathBuf),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Help;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--apply" => {
                let path = args.next().context("--apply needs a batch file")?;
                mode = CliMode::Apply(PathBuf::from(path));
            }
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SYNCPROP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let batch_path = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: syncpropd --apply <batch.json>");
            println!("  --apply <file>   Apply a JSON array of sync items to the local folder");
            return Ok(());
        }
        CliMode::Apply(path) => path,
    };
    init_tracing();

    let config = PropagatorConfig::from_env()?;
    tokio::fs::create_dir_all(&config.local_dir)
        .await
        .with_context(|| format!("failed to create local folder at {:?}", config.local_dir))?;
    let journal = Arc::new(
        SyncJournal::open(&config.journal_path)
            .await
            .context("failed to open sync journal")?,
    );
    let vfs = Arc::new(Vfs::for_mode(config.vfs_mode, &config.vfs_suffix));
    vfs.start(VfsSetupParams {
        filesystem_path: config.local_dir.clone(),
        journal: journal.clone(),
    })
    .await
    .context("failed to start virtual file backend")?;

    let raw = tokio::fs::read(&batch_path)
        .await
        .with_context(|| format!("failed to read batch file {:?}", batch_path))?;
    let items: Vec<SyncItem> = serde_json::from_slice(&raw).context("invalid batch file")?;
    tracing::info!(
        target: "syncpropd",
        local_dir = %config.local_dir.display(),
        items = items.len(),
        vfs = ?config.vfs_mode,
        "applying batch"
    );

    let (propagator, mut events) = Propagator::new(
        config.local_dir.clone(),
        journal,
        vfs.clone(),
        config.options.clone(),
        config.case_sensitive,
    );
    let listener = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PropagatorEvent::SeenLockedFile { path, mode } => {
                    tracing::warn!(target: "syncpropd", path = %path.display(), ?mode, "file is locked");
                }
                other => tracing::trace!(target: "syncpropd", event = ?other, "propagator event"),
            }
        }
    });

    let report = apply_batch(&propagator, items).await;
    drop(propagator);
    let _ = listener.await;
    vfs.stop();

    for (file, status) in &report.results {
        println!("{file}: {status}");
    }
    if report.stopped_early {
        anyhow::bail!("batch stopped after a fatal error");
    }
    let failed = report.error_count();
    if failed > 0 {
        anyhow::bail!("{failed} item(s) failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_help() {
        let mode = parse_cli_mode(args(&["syncpropd"])).unwrap();
        assert_eq!(mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_supports_apply() {
        let mode = parse_cli_mode(args(&["syncpropd", "--apply", "batch.json"])).unwrap();
        assert_eq!(mode, CliMode::Apply(PathBuf::from("batch.json")));
    }

    #[test]
    fn parse_cli_mode_requires_batch_path() {
        assert!(parse_cli_mode(args(&["syncpropd", "--apply"])).is_err());
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_flags() {
        assert!(parse_cli_mode(args(&["syncpropd", "--logout"])).is_err());
    }
}
