use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use walbridge_core::{ConnectorTask, TaskSettings};

use crate::backends::FileBackendFactory;
use crate::offsets::FileOffsetStore;
use crate::runner::{self, RunOptions};

pub struct RunArgs {
    pub changes: PathBuf,
    pub snapshot: Option<PathBuf>,
    pub offsets: PathBuf,
    pub commit_every: u64,
    pub max_polls: Option<u64>,
    pub follow_interval_ms: u64,
}

pub async fn cmd_run(settings: TaskSettings, args: RunArgs) -> Result<()> {
    let factory = FileBackendFactory::new(
        args.changes,
        args.snapshot,
        Duration::from_millis(args.follow_interval_ms),
    );
    let task = Arc::new(ConnectorTask::new(Arc::new(factory)));
    let store = FileOffsetStore::new(args.offsets);
    info!(
        server = %settings.server_name,
        offsets = %store.path().display(),
        "Starting walbridge task"
    );
    let options = RunOptions {
        commit_every: args.commit_every,
        max_polls: args.max_polls,
    };

    let shutdown = CancellationToken::new();
    let watcher = runner::shutdown_on_ctrl_c(shutdown.clone());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = runner::run_task(task, &settings, &store, &options, shutdown.clone(), &mut out).await;

    shutdown.cancel();
    let _ = watcher.await;

    let summary = result?;
    eprintln!(
        "Processed {} records in {} polls{}",
        summary.records,
        summary.polls,
        summary
            .committed
            .map(|o| format!(", committed {}", o.lsn))
            .unwrap_or_default()
    );
    Ok(())
}
